use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};
use geowiki_core::config::{GeowikiConfig, load_config};
use geowiki_core::error::is_not_found;
use geowiki_core::export::{ExportArtifact, ExportFormat, export, write_artifact};
use geowiki_core::frontpage::{FrontPageView, front_page};
use geowiki_core::geometry::parse_point_pair;
use geowiki_core::maps::filter::BoundingBox;
use geowiki_core::maps::layers::MapLayer;
use geowiki_core::maps::nearby::{Nearby, find_nearby};
use geowiki_core::maps::views::{
    MapObject, all_objects_as_points, global_map_for_tag, map_for_tag, map_object,
    objects_for_bounds, region_layer_map, region_map,
};
use geowiki_core::migrate::{PageMigrator, read_csv_file};
use geowiki_core::model::{NewRegion, Region};
use geowiki_core::runtime::{
    InitOptions, MIGRATIONS_POLICY_MESSAGE, PathOverrides, ResolutionContext, ResolvedPaths,
    ensure_runtime_ready, init_layout, inspect_runtime, resolve_paths,
};
use geowiki_core::schema::run_migrations;
use geowiki_core::slug::tag_slug;
use geowiki_core::store::{MapQuery, Store};
use geowiki_core::tags::{list_tags, suggest_tags, tagged_pages};
use serde::Serialize;
use tracing::debug;

mod logging;

const EXIT_NOT_FOUND: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "geowiki",
    version,
    about = "Region wiki maps: CSV migration, exports, map views and nearby search"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Print reports as JSON")]
    json: bool,
    #[arg(short, long, global = true, action = ArgAction::Count, help = "Raise log verbosity")]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
    json: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
            json: cli.json,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    Db(DbArgs),
    Region(RegionArgs),
    #[command(about = "Create or update pages from CSV rows")]
    Migrate(MigrateArgs),
    Export(ExportArgs),
    Map(MapArgs),
    Nearby(NearbyArgs),
    Tags(TagsArgs),
    Frontpage(FrontpageArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Skip writing .geowiki/config.toml")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct DbArgs {
    #[command(subcommand)]
    command: DbSubcommand,
}

#[derive(Debug, Subcommand)]
enum DbSubcommand {
    Migrate,
    Stats,
}

#[derive(Debug, Args)]
struct RegionArgs {
    #[command(subcommand)]
    command: RegionSubcommand,
}

#[derive(Debug, Subcommand)]
enum RegionSubcommand {
    Add {
        slug: String,
        full_name: String,
        #[arg(long, value_name = "LNG,LAT")]
        center: Option<String>,
        #[arg(long)]
        zoom: Option<u8>,
        #[arg(long, help = "Meta regions never get a composite front page")]
        meta: bool,
        #[arg(long, value_name = "WKT")]
        geom: Option<String>,
    },
    List,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    region: String,
    csv: PathBuf,
    #[arg(long, value_delimiter = ',', help = "Tags for every imported page")]
    tags: Vec<String>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    region: String,
    #[arg(value_name = "csv|txt|kml|json")]
    format: String,
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct MapArgs {
    #[command(subcommand)]
    command: MapSubcommand,
}

#[derive(Debug, Subcommand)]
enum MapSubcommand {
    Region {
        region: String,
        #[arg(long, help = "Split into tag layers")]
        layers: bool,
    },
    Bounds {
        region: String,
        #[arg(long, value_name = "MINX,MINY,MAXX,MAXY")]
        bbox: Option<String>,
        #[arg(long)]
        zoom: Option<u8>,
    },
    Tag {
        tag: String,
        #[arg(long)]
        region: Option<String>,
    },
    Points {
        #[arg(long)]
        region: Option<String>,
    },
}

#[derive(Debug, Args)]
struct NearbyArgs {
    #[arg(long)]
    lat: Option<String>,
    #[arg(long)]
    lng: Option<String>,
    #[arg(long, help = "Search radius in degrees")]
    radius: Option<f64>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    region: Option<String>,
}

#[derive(Debug, Args)]
struct TagsArgs {
    #[command(subcommand)]
    command: TagsSubcommand,
}

#[derive(Debug, Subcommand)]
enum TagsSubcommand {
    List {
        region: String,
    },
    Show {
        region: String,
        tag: String,
    },
    Suggest {
        term: String,
        #[arg(long)]
        region: Option<String>,
    },
}

#[derive(Debug, Args)]
struct FrontpageArgs {
    region: String,
}

struct Session {
    paths: ResolvedPaths,
    config: GeowikiConfig,
    store: Store,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);
    let runtime = RuntimeOptions::from_cli(&cli);

    match run(&runtime, cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if is_not_found(&err) => {
            eprintln!("not found: {err:#}");
            ExitCode::from(EXIT_NOT_FOUND)
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(runtime: &RuntimeOptions, command: Option<Commands>) -> Result<()> {
    match command {
        Some(Commands::Init(args)) => run_init(runtime, args),
        Some(Commands::Db(DbArgs { command })) => match command {
            DbSubcommand::Migrate => run_db_migrate(runtime),
            DbSubcommand::Stats => run_db_stats(runtime),
        },
        Some(Commands::Region(RegionArgs { command })) => match command {
            RegionSubcommand::Add {
                slug,
                full_name,
                center,
                zoom,
                meta,
                geom,
            } => {
                let mut region = NewRegion::named(&slug, &full_name);
                region.center = center.as_deref().map(parse_center).transpose()?;
                region.default_zoom = zoom.unwrap_or(region.default_zoom);
                region.is_meta_region = meta;
                region.geom_wkt = geom;
                run_region_add(runtime, &region)
            }
            RegionSubcommand::List => run_region_list(runtime),
        },
        Some(Commands::Migrate(args)) => run_migrate(runtime, args),
        Some(Commands::Export(args)) => run_export(runtime, args),
        Some(Commands::Map(MapArgs { command })) => run_map(runtime, command),
        Some(Commands::Nearby(args)) => run_nearby(runtime, args),
        Some(Commands::Tags(TagsArgs { command })) => run_tags(runtime, command),
        Some(Commands::Frontpage(FrontpageArgs { region })) => run_frontpage(runtime, &region),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(
        &paths,
        &InitOptions {
            materialize_config: !args.no_config,
            run_migrations: true,
            force: args.force,
        },
    )?;

    println!("Initialized geowiki runtime layout");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("state_dir: {}", normalize_path(&paths.state_dir));
    println!("data_dir: {}", normalize_path(&paths.data_dir));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    println!("applied_migrations: {}", report.applied_migrations);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_migrate(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = run_migrations(&paths)?;

    println!("db migrate");
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("applied: {}", report.applied.len());
    for migration in &report.applied {
        println!("applied.migration: v{:03} {}", migration.version, migration.name);
    }
    println!("schema_version: {}", report.current_version);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_db_stats(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("db stats");
    println!("project_root: {}", normalize_path(&paths.project_root));
    println!("db_path: {}", normalize_path(&paths.db_path));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "<missing>".to_string())
    );
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("pending_migrations: {}", status.pending_migrations);
    if status.db_exists && status.pending_migrations == 0 {
        let stats = Store::open(&paths.db_path)?.stats()?;
        println!("regions: {}", stats.regions);
        println!("pages: {}", stats.pages);
        println!("tags: {}", stats.tags);
        println!("map_data: {}", stats.map_data);
    } else {
        println!("policy: {MIGRATIONS_POLICY_MESSAGE}");
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_region_add(runtime: &RuntimeOptions, region: &NewRegion) -> Result<()> {
    let session = open_session(runtime)?;
    let region = session.store.insert_region(region)?;
    println!("region added");
    print_region(&region);
    print_diagnostics(runtime, &session.paths);
    Ok(())
}

fn run_region_list(runtime: &RuntimeOptions) -> Result<()> {
    let session = open_session(runtime)?;
    let regions = session.store.regions()?;
    println!("regions.count: {}", regions.len());
    for region in &regions {
        println!();
        print_region(region);
    }
    Ok(())
}

fn run_migrate(runtime: &RuntimeOptions, args: MigrateArgs) -> Result<()> {
    let session = open_session(runtime)?;
    let region = session.store.region_by_slug(&args.region)?;
    let rows = read_csv_file(&args.csv)?;

    let mut tag_slugs = Vec::new();
    for name in args.tags.iter().map(|name| name.trim()).filter(|name| !name.is_empty()) {
        session.store.ensure_tag(region.id, name)?;
        tag_slugs.push(tag_slug(name));
    }

    let mut migrator = PageMigrator::new(&session.store, &region, session.config.migrate_config());
    migrator.configure_for_tags(&tag_slugs)?;
    for row in rows {
        migrator.add_record(row);
    }
    let result = migrator.migrate()?;

    if runtime.json {
        return print_json(&result);
    }
    println!("migrate");
    println!("region: {}", region.slug);
    println!("csv: {}", normalize_path(&args.csv));
    println!(
        "template: {}",
        migrator
            .template()
            .map(|template| template.name.as_str())
            .unwrap_or("<none>")
    );
    println!("total: {}", result.total);
    println!("new: {}", result.new);
    println!("errors: {}", result.errors.len());
    for error in &result.errors {
        println!(
            "  - row {} ({}): {}",
            error.row,
            error.name.as_deref().unwrap_or("<unnamed>"),
            error.message
        );
    }
    Ok(())
}

fn run_export(runtime: &RuntimeOptions, args: ExportArgs) -> Result<()> {
    let session = open_session(runtime)?;
    let format = ExportFormat::parse(&args.format)?;
    let region = session.store.region_by_slug(&args.region)?;
    let artifact = export(&session.store, &region, format, &session.config.export_config())?;
    let destination = args.out.unwrap_or_else(|| {
        session
            .paths
            .exports_dir
            .join(format!("{}.{}", region.slug, artifact.extension))
    });
    let written = write_artifact(&artifact, &destination)?;
    let summary = ExportSummary::new(&region.slug, format, &artifact, &written);

    if runtime.json {
        return print_json(&summary);
    }
    println!("export");
    println!("region: {}", summary.region);
    println!("format: {}", summary.format);
    println!("mime_type: {}", summary.mime_type);
    println!("items: {}", summary.items);
    println!("bytes: {}", summary.bytes);
    println!("path: {}", summary.path);
    Ok(())
}

#[derive(Debug, Serialize)]
struct ExportSummary<'a> {
    region: &'a str,
    format: &'static str,
    mime_type: &'static str,
    items: usize,
    bytes: usize,
    path: String,
}

impl<'a> ExportSummary<'a> {
    fn new(region: &'a str, format: ExportFormat, artifact: &ExportArtifact, written: &Path) -> Self {
        Self {
            region,
            format: format.as_str(),
            mime_type: artifact.mime_type,
            items: artifact.items,
            bytes: artifact.bytes.len(),
            path: normalize_path(written),
        }
    }
}

fn run_map(runtime: &RuntimeOptions, command: MapSubcommand) -> Result<()> {
    let session = open_session(runtime)?;
    let map_config = session.config.map_config();
    match command {
        MapSubcommand::Region { region, layers } => {
            let region = session.store.region_by_slug(&region)?;
            if layers {
                let layers: Vec<MapLayer<MapObject>> = region_layer_map(&session.store, &region, &map_config)?
                    .into_iter()
                    .map(|layer| MapLayer {
                        name: layer.name,
                        records: layer
                            .records
                            .iter()
                            .map(|record| map_object(&region.slug, record))
                            .collect(),
                    })
                    .collect();
                if runtime.json {
                    return print_json(&layers);
                }
                for layer in &layers {
                    println!(
                        "layer: {} ({} objects)",
                        layer.name.as_deref().unwrap_or("<base>"),
                        layer.records.len()
                    );
                    if let Some(icon) = layer.icon_path(&map_config.icon_url_prefix) {
                        println!("layer.icon: {icon}");
                    }
                }
                return Ok(());
            }
            let objects: Vec<MapObject> = region_map(&session.store, &region, &map_config)?
                .iter()
                .map(|record| map_object(&region.slug, record))
                .collect();
            print_objects(runtime, &objects)
        }
        MapSubcommand::Bounds { region, bbox, zoom } => {
            let region = session.store.region_by_slug(&region)?;
            let bbox = bbox.as_deref().map(BoundingBox::parse).transpose()?;
            let objects = objects_for_bounds(&session.store, &region, bbox.as_ref(), zoom, &map_config)?;
            print_objects(runtime, &objects)
        }
        MapSubcommand::Tag { tag, region } => {
            let slug = tag_slug(&tag);
            let objects = match region {
                Some(region) => {
                    let region = session.store.region_by_slug(&region)?;
                    map_for_tag(&session.store, &region, &slug)?
                        .iter()
                        .map(|record| map_object(&region.slug, record))
                        .collect()
                }
                None => global_map_for_tag(&session.store, &slug)?,
            };
            print_objects(runtime, &objects)
        }
        MapSubcommand::Points { region } => {
            let region = lookup_optional_region(&session.store, region.as_deref())?;
            let points = all_objects_as_points(&session.store, region.as_ref())?;
            if runtime.json {
                return print_json(&points);
            }
            println!("points.count: {}", points.len());
            for point in &points {
                println!("point: {} {} {} {}", point.x, point.y, point.page_url, point.page_name);
            }
            Ok(())
        }
    }
}

fn run_nearby(runtime: &RuntimeOptions, args: NearbyArgs) -> Result<()> {
    let session = open_session(runtime)?;
    let mut config = session.config.nearby_config();
    if let Some(radius) = args.radius {
        config.radius_degrees = radius;
    }
    if let Some(limit) = args.limit {
        config.limit = limit;
    }
    let point = match (args.lng.as_deref(), args.lat.as_deref()) {
        (Some(lng), Some(lat)) => Some(parse_point_pair(lng, lat)?),
        _ => None,
    };
    let region = lookup_optional_region(&session.store, args.region.as_deref())?;
    let query = region
        .as_ref()
        .map(|region| MapQuery::region(region.id))
        .unwrap_or_default();
    let records = session.store.map_data(&query)?;

    let hits = match find_nearby(&records, point, &config) {
        Nearby::NoLocation => {
            if runtime.json {
                return print_json(&serde_json::Value::Null);
            }
            println!("nearby: <no location>");
            return Ok(());
        }
        Nearby::Found(hits) => hits,
    };
    if runtime.json {
        return print_json(&hits);
    }
    println!("nearby.count: {}", hits.len());
    for hit in &hits {
        println!(
            "nearby: {:.6} {} {} ({})",
            hit.distance,
            hit.family.as_str(),
            hit.page_name,
            hit.page_slug
        );
    }
    Ok(())
}

fn run_tags(runtime: &RuntimeOptions, command: TagsSubcommand) -> Result<()> {
    let session = open_session(runtime)?;
    match command {
        TagsSubcommand::List { region } => {
            let region = session.store.region_by_slug(&region)?;
            let counts = list_tags(&session.store, &region)?;
            if runtime.json {
                return print_json(&counts);
            }
            println!("tags.count: {}", counts.len());
            for count in &counts {
                println!("tag: {} ({}) pages={}", count.tag.name, count.tag.slug, count.pages);
            }
        }
        TagsSubcommand::Show { region, tag } => {
            let region = session.store.region_by_slug(&region)?;
            let tagged = tagged_pages(&session.store, &region, &tag)?;
            if runtime.json {
                return print_json(&tagged);
            }
            println!("tag: {} ({})", tagged.tag.name, tagged.tag.slug);
            println!("pages.count: {}", tagged.pages.len());
            for page in &tagged.pages {
                println!("page: {} ({})", page.name, page.slug);
            }
        }
        TagsSubcommand::Suggest { term, region } => {
            let region = lookup_optional_region(&session.store, region.as_deref())?;
            let suggestions = suggest_tags(&session.store, &term, region.as_ref())?;
            if runtime.json {
                return print_json(&suggestions);
            }
            for suggestion in &suggestions {
                println!("suggestion: {} ({})", suggestion.name, suggestion.slug);
            }
        }
    }
    Ok(())
}

fn run_frontpage(runtime: &RuntimeOptions, region: &str) -> Result<()> {
    let session = open_session(runtime)?;
    let view = front_page(
        &session.store,
        region,
        &session.config.map_config(),
        &session.config.frontpage_config(),
    )?;
    if runtime.json {
        return print_json(&view);
    }
    match view {
        FrontPageView::Page { page, exists } => {
            println!("front_page: plain");
            println!("page: {} ({})", page.name, page.slug);
            println!("exists: {}", format_flag(exists));
        }
        FrontPageView::Composite(composite) => {
            println!("front_page: composite");
            println!("region: {}", composite.region);
            println!("cover.title: {}", composite.cover.title);
            println!(
                "cover.photo: {}",
                composite.cover_photo.as_deref().unwrap_or("<none>")
            );
            for layer in &composite.layers {
                println!(
                    "layer: {} ({} points)",
                    layer.name.as_deref().unwrap_or("<base>"),
                    layer.records.len()
                );
            }
            for card in &composite.cards {
                println!("card: {} ({} pages)", card.name, card.pages.len());
                for page in &card.pages {
                    println!("  - {} score={} {}", page.name, page.score, page.url);
                }
            }
        }
    }
    Ok(())
}

fn open_session(runtime: &RuntimeOptions) -> Result<Session> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    ensure_runtime_ready(&paths, &status)?;
    let config = load_config(&paths.config_path)?;
    let store = Store::open(&paths.db_path)?;
    debug!(db_path = %normalize_path(&paths.db_path), "opened store");
    Ok(Session {
        paths,
        config,
        store,
    })
}

fn lookup_optional_region(store: &Store, slug: Option<&str>) -> Result<Option<Region>> {
    slug.map(|slug| store.region_by_slug(slug)).transpose()
}

fn parse_center(value: &str) -> Result<geo::Point<f64>> {
    let Some((lng, lat)) = value.split_once(',') else {
        bail!("center must be LNG,LAT: {value:?}");
    };
    parse_point_pair(lng, lat).with_context(|| format!("invalid center {value:?}"))
}

fn print_region(region: &Region) {
    println!("slug: {}", region.slug);
    println!("full_name: {}", region.full_name);
    println!("default_zoom: {}", region.default_zoom);
    println!("meta: {}", format_flag(region.is_meta_region));
    match region.center {
        Some(center) => println!("center: {},{}", center.x(), center.y()),
        None => println!("center: <none>"),
    }
    println!("outline: {}", format_flag(region.geom_wkt.is_some()));
}

fn print_objects(runtime: &RuntimeOptions, objects: &[MapObject]) -> Result<()> {
    if runtime.json {
        return print_json(&objects);
    }
    println!("objects.count: {}", objects.len());
    for object in objects {
        println!(
            "object: {} {} length={:.1}",
            object.page_url, object.page_name, object.length
        );
    }
    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_summary_serializes_counts_and_path() {
        let artifact = ExportArtifact {
            bytes: b"id,name\n".to_vec(),
            mime_type: "text/csv",
            extension: "csv",
            items: 0,
        };
        let summary = ExportSummary::new("hualien", ExportFormat::Csv, &artifact, Path::new("out/hualien.csv"));
        let value = serde_json::to_value(&summary).expect("json");
        assert_eq!(value["region"], "hualien");
        assert_eq!(value["format"], "csv");
        assert_eq!(value["mime_type"], "text/csv");
        assert_eq!(value["items"], 0);
        assert_eq!(value["bytes"], 8);
        assert_eq!(value["path"], "out/hualien.csv");
    }
}
