use serde::Serialize;

pub const LAYER_ICON_SIZE: u32 = 32;

/// Overlay style shared by every tag layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LayerStyle {
    pub graphic_width: u32,
    pub graphic_height: u32,
    pub opacity: f64,
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            graphic_width: LAYER_ICON_SIZE,
            graphic_height: LAYER_ICON_SIZE,
            opacity: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapLayer<T> {
    /// `None` for the base layer.
    pub name: Option<String>,
    pub records: Vec<T>,
}

impl<T> MapLayer<T> {
    pub fn is_base(&self) -> bool {
        self.name.is_none()
    }

    /// Icon resource for a tag layer; the base layer has none.
    pub fn icon_path(&self, prefix: &str) -> Option<String> {
        self.name.as_ref().map(|name| format!("{prefix}{name}.png"))
    }

    pub fn style(&self) -> Option<LayerStyle> {
        self.name.as_ref().map(|_| LayerStyle::default())
    }
}

/// Base layer first, then one layer per `layer_names` entry that matches a record.
///
/// `has_tag(record, name)` decides membership; a record may sit in several tag layers.
pub fn build_layers<T, F>(records: &[T], layer_names: &[String], has_tag: F) -> Vec<MapLayer<T>>
where
    T: Clone,
    F: Fn(&T, &str) -> bool,
{
    let mut layers = Vec::with_capacity(layer_names.len() + 1);
    layers.push(MapLayer {
        name: None,
        records: records.to_vec(),
    });
    for name in layer_names {
        let members: Vec<T> = records
            .iter()
            .filter(|record| has_tag(record, name))
            .cloned()
            .collect();
        if members.is_empty() {
            continue;
        }
        layers.push(MapLayer {
            name: Some(name.clone()),
            records: members,
        });
    }
    layers
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use super::*;

    fn catalog() -> Vec<String> {
        ["消防隊", "警察局", "醫院"].iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn base_layer_comes_first_and_holds_everything() {
        let tags: HashMap<u32, BTreeSet<&str>> = HashMap::from([
            (1, BTreeSet::from(["醫院"])),
            (2, BTreeSet::from(["消防隊", "醫院"])),
            (3, BTreeSet::new()),
        ]);
        let layers = build_layers(&[1u32, 2, 3], &catalog(), |id, name| {
            tags.get(id).is_some_and(|names| names.contains(name))
        });

        assert!(layers[0].is_base());
        assert_eq!(layers[0].records, vec![1, 2, 3]);
        let names: Vec<_> = layers[1..]
            .iter()
            .map(|layer| layer.name.as_deref().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["消防隊", "醫院"]);
        assert_eq!(layers[2].records, vec![1, 2]);
        for layer in &layers[1..] {
            assert!(layer.records.len() <= layers[0].records.len());
        }
    }

    #[test]
    fn empty_input_yields_only_the_base_layer() {
        let layers = build_layers::<u32, _>(&[], &catalog(), |_, _| true);
        assert_eq!(layers.len(), 1);
        assert!(layers[0].records.is_empty());
    }

    #[test]
    fn icon_path_uses_the_layer_name_verbatim() {
        let layer = MapLayer {
            name: Some("醫院".to_string()),
            records: vec![1],
        };
        assert_eq!(
            layer.icon_path("/static/tagicon/").as_deref(),
            Some("/static/tagicon/醫院.png")
        );
        assert_eq!(layer.style(), Some(LayerStyle::default()));
        let base = MapLayer::<u32> {
            name: None,
            records: vec![],
        };
        assert_eq!(base.icon_path("/static/tagicon/"), None);
    }
}
