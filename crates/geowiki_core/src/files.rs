use anyhow::Result;

use crate::model::Region;
use crate::store::Store;

/// A file name not yet attached to the page: `map.png`, then `map 2.png`, `map 3.png`, ...
///
/// Names without an extension get the counter appended at the end.
pub fn find_available_filename(store: &Store, region: &Region, page_slug: &str, filename: &str) -> Result<String> {
    let (base, extension) = match filename.rsplit_once('.') {
        Some((base, extension)) if !base.is_empty() => (base, Some(extension)),
        _ => (filename, None),
    };
    let mut candidate = filename.to_string();
    let mut counter = 1u32;
    while store.page_file_exists(region.id, page_slug, &candidate)? {
        counter += 1;
        candidate = match extension {
            Some(extension) => format!("{base} {counter}.{extension}"),
            None => format!("{base} {counter}"),
        };
    }
    Ok(candidate)
}
