//! On-disk layout of a geowiki project: `.geowiki/` with the database, config and exports.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::config;
use crate::schema;

pub const MIGRATIONS_POLICY_MESSAGE: &str =
    "Run `geowiki db migrate` to apply pending schema migrations.";

pub const STATE_DIR_NAME: &str = ".geowiki";
pub const DB_FILENAME: &str = "geowiki.db";

const ENV_PROJECT_ROOT: &str = "GEOWIKI_PROJECT_ROOT";
const ENV_DATA_DIR: &str = "GEOWIKI_DATA_DIR";
const ENV_CONFIG: &str = "GEOWIKI_CONFIG";

/// Where a resolved path came from, highest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

/// Command-line path flags.
#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub state_dir: PathBuf,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
    pub exports_dir: PathBuf,
    pub root_source: ValueSource,
    pub data_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        let rows = [
            ("project_root", &self.project_root, Some(self.root_source)),
            ("state_dir", &self.state_dir, None),
            ("data_dir", &self.data_dir, Some(self.data_source)),
            ("db_path", &self.db_path, None),
            ("config_path", &self.config_path, Some(self.config_source)),
            ("exports_dir", &self.exports_dir, None),
        ];
        let mut out = String::new();
        for (key, path, source) in rows {
            let _ = match source {
                Some(source) => writeln!(out, "{key}={} ({})", normalize_for_display(path), source.as_str()),
                None => writeln!(out, "{key}={}", normalize_for_display(path)),
            };
        }
        out.push_str("policy=");
        out.push_str(MIGRATIONS_POLICY_MESSAGE);
        out
    }

    /// Layout directories created by `init`.
    fn layout_dirs(&self) -> [&Path; 3] {
        [
            self.state_dir.as_path(),
            self.data_dir.as_path(),
            self.exports_dir.as_path(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub project_root_exists: bool,
    pub state_dir_exists: bool,
    pub data_dir_exists: bool,
    pub db_exists: bool,
    pub db_size_bytes: Option<u64>,
    pub config_exists: bool,
    pub pending_migrations: usize,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> Result<RuntimeStatus> {
    let db_size_bytes = match fs::metadata(&paths.db_path) {
        Ok(metadata) => Some(metadata.len()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(err).with_context(|| format!("failed to inspect {}", paths.db_path.display()));
        }
    };
    let status = RuntimeStatus {
        project_root_exists: paths.project_root.is_dir(),
        state_dir_exists: paths.state_dir.is_dir(),
        data_dir_exists: paths.data_dir.is_dir(),
        db_exists: db_size_bytes.is_some(),
        db_size_bytes,
        config_exists: paths.config_path.is_file(),
        pending_migrations: schema::pending_migration_count(&paths.db_path)?,
        warnings: Vec::new(),
    };
    Ok(RuntimeStatus {
        warnings: status_warnings(&status),
        ..status
    })
}

fn status_warnings(status: &RuntimeStatus) -> Vec<String> {
    let mut warnings = Vec::new();
    if !status.state_dir_exists {
        warnings.push(format!("{STATE_DIR_NAME}/ is missing; run `geowiki init` first"));
    }
    if !status.config_exists {
        warnings.push("config.toml is missing; built-in defaults are in effect".to_string());
    }
    if status.pending_migrations > 0 {
        warnings.push(format!(
            "{} schema migration(s) pending. {MIGRATIONS_POLICY_MESSAGE}",
            status.pending_migrations
        ));
    }
    warnings
}

/// Fails unless the layout exists and the database schema is current.
pub fn ensure_runtime_ready(paths: &ResolvedPaths, status: &RuntimeStatus) -> Result<()> {
    if !status.state_dir_exists {
        bail!(
            "no geowiki project at {} ({STATE_DIR_NAME}/ not found). Run: geowiki init --project-root {}",
            normalize_for_display(&paths.project_root),
            normalize_for_display(&paths.project_root)
        );
    }
    if status.pending_migrations > 0 {
        bail!(
            "database schema is behind by {} migration(s). {MIGRATIONS_POLICY_MESSAGE}",
            status.pending_migrations
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub materialize_config: bool,
    pub run_migrations: bool,
    /// Rewrite `config.toml` even when it exists.
    pub force: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            materialize_config: true,
            run_migrations: true,
            force: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
    pub applied_migrations: usize,
}

/// Resolve every path: flag, then environment, then the project layout default.
pub fn resolve_paths(context: &ResolutionContext, overrides: &PathOverrides) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) =
        match pick_override(overrides.project_root.as_deref(), ENV_PROJECT_ROOT, &lookup_env) {
            Some((path, source)) => (absolutize(&path, &context.cwd), source),
            None => find_project_root(context)
                .map(|root| (root, ValueSource::Heuristic))
                .unwrap_or_else(|| (context.cwd.clone(), ValueSource::Heuristic)),
        };
    if project_root.as_os_str().is_empty() {
        bail!("failed to resolve project root");
    }
    let state_dir = project_root.join(STATE_DIR_NAME);

    let (data_dir, data_source) = pick_override(overrides.data_dir.as_deref(), ENV_DATA_DIR, &lookup_env)
        .map(|(path, source)| (absolutize(&path, &project_root), source))
        .unwrap_or_else(|| (state_dir.join("data"), ValueSource::Default));

    let (config_path, config_source) = pick_override(overrides.config.as_deref(), ENV_CONFIG, &lookup_env)
        .map(|(path, source)| (absolutize(&path, &project_root), source))
        .unwrap_or_else(|| (state_dir.join("config.toml"), ValueSource::Default));

    Ok(ResolvedPaths {
        db_path: data_dir.join(DB_FILENAME),
        exports_dir: state_dir.join("exports"),
        project_root,
        state_dir,
        data_dir,
        config_path,
        root_source,
        data_source,
        config_source,
    })
}

fn pick_override<F>(flag: Option<&Path>, env_key: &str, lookup_env: &F) -> Option<(PathBuf, ValueSource)>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = flag {
        return Some((path.to_path_buf(), ValueSource::Flag));
    }
    lookup_env(env_key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(|value| (PathBuf::from(value), ValueSource::Env))
}

/// Nearest ancestor of the working directory, then of the executable, holding `.geowiki/`.
fn find_project_root(context: &ResolutionContext) -> Option<PathBuf> {
    let exe_ancestors = context.executable_dir.iter().flat_map(|dir| dir.ancestors());
    context
        .cwd
        .ancestors()
        .chain(exe_ancestors)
        .find(|candidate| candidate.join(STATE_DIR_NAME).is_dir())
        .map(Path::to_path_buf)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in paths.layout_dirs() {
        if dir.is_dir() {
            continue;
        }
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        created_dirs.push(dir.to_path_buf());
    }

    let wrote_config = options.materialize_config && (options.force || !paths.config_path.exists());
    if wrote_config {
        write_config(&paths.config_path, &render_materialized_config(paths))?;
    }

    let applied_migrations = if options.run_migrations {
        schema::run_migrations(paths)?.applied.len()
    } else {
        0
    };

    info!(
        project_root = %normalize_for_display(&paths.project_root),
        created = created_dirs.len(),
        wrote_config,
        applied_migrations,
        "initialized runtime layout"
    );
    Ok(InitReport {
        created_dirs,
        wrote_config,
        applied_migrations,
    })
}

fn write_config(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

/// Config file with every key commented out at its built-in default.
pub fn render_materialized_config(paths: &ResolvedPaths) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# geowiki configuration (written by `geowiki init`)");
    let _ = writeln!(out, "# database: {}", normalize_for_display(&paths.db_path));
    let _ = writeln!(out, "# Every key is optional; uncomment to override the default shown.");

    let _ = writeln!(out, "\n[map]");
    let _ = writeln!(out, "# layer_names = {:?}", config::DEFAULT_LAYER_NAMES);
    let _ = writeln!(out, "# excluded_tag_slugs = {:?}", config::DEFAULT_EXCLUDED_TAG_SLUGS);
    let _ = writeln!(out, "# region_map_zoom = {}", config::DEFAULT_REGION_MAP_ZOOM);
    let _ = writeln!(out, "# point_suppression_max_zoom = {}", config::DEFAULT_POINT_SUPPRESSION_MAX_ZOOM);
    let _ = writeln!(
        out,
        "# point_suppression_min_polygons = {}",
        config::DEFAULT_POINT_SUPPRESSION_MIN_POLYGONS
    );
    let _ = writeln!(out, "# min_length_base_meters = {:?}", config::DEFAULT_MIN_LENGTH_BASE_METERS);
    let _ = writeln!(out, "# icon_url_prefix = {:?}", config::DEFAULT_ICON_URL_PREFIX);

    let _ = writeln!(out, "\n[nearby]");
    let _ = writeln!(out, "# radius_degrees = {:?}", config::DEFAULT_NEARBY_RADIUS_DEGREES);
    let _ = writeln!(out, "# limit = {}", config::DEFAULT_NEARBY_LIMIT);

    let _ = writeln!(out, "\n[migrate]");
    let _ = writeln!(out, "# name_columns = {:?}", config::DEFAULT_NAME_COLUMNS);
    let _ = writeln!(out, "# latitude_columns = {:?}", config::DEFAULT_LATITUDE_COLUMNS);
    let _ = writeln!(out, "# longitude_columns = {:?}", config::DEFAULT_LONGITUDE_COLUMNS);

    let _ = writeln!(out, "\n[export]");
    let _ = writeln!(out, "# kml_document_name = {:?}", config::DEFAULT_KML_DOCUMENT_NAME);
    let _ = writeln!(out, "# kml_folder_name = {:?}", config::DEFAULT_KML_FOLDER_NAME);

    let _ = writeln!(out, "\n[frontpage]");
    let _ = writeln!(out, "# card_categories = {:?}", config::DEFAULT_CARD_CATEGORIES);
    out
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
pub(crate) fn test_paths(root: &Path) -> ResolvedPaths {
    let context = ResolutionContext {
        cwd: root.to_path_buf(),
        executable_dir: None,
    };
    let overrides = PathOverrides {
        project_root: Some(root.join("project")),
        ..PathOverrides::default()
    };
    resolve_paths_with_lookup(&context, &overrides, |_| None).expect("test paths")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::config::{GeowikiConfig, load_config};

    fn context(cwd: &Path) -> ResolutionContext {
        ResolutionContext {
            cwd: cwd.to_path_buf(),
            executable_dir: None,
        }
    }

    #[test]
    fn flag_beats_env_for_project_root() {
        let temp = tempdir().expect("tempdir");
        let flag_root = temp.path().join("flag-root");
        let overrides = PathOverrides {
            project_root: Some(flag_root.clone()),
            ..PathOverrides::default()
        };
        let env = HashMap::from([(
            ENV_PROJECT_ROOT.to_string(),
            temp.path().join("env-root").to_string_lossy().to_string(),
        )]);

        let resolved = resolve_paths_with_lookup(&context(temp.path()), &overrides, |key| env.get(key).cloned())
            .expect("resolve paths");
        assert_eq!(resolved.project_root, flag_root);
        assert_eq!(resolved.root_source, ValueSource::Flag);
    }

    #[test]
    fn relative_env_data_dir_hangs_off_the_project_root() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let env = HashMap::from([(ENV_DATA_DIR.to_string(), " var/db ".to_string())]);
        let overrides = PathOverrides {
            project_root: Some(root.clone()),
            ..PathOverrides::default()
        };
        let resolved = resolve_paths_with_lookup(&context(temp.path()), &overrides, |key| env.get(key).cloned())
            .expect("resolve");
        assert_eq!(resolved.data_dir, root.join("var/db"));
        assert_eq!(resolved.data_source, ValueSource::Env);
        assert_eq!(resolved.db_path, root.join("var/db").join(DB_FILENAME));
        assert_eq!(resolved.config_source, ValueSource::Default);
    }

    #[test]
    fn project_root_is_found_from_a_nested_directory() {
        let temp = tempdir().expect("tempdir");
        let root = temp.path().join("project");
        let nested = root.join("a").join("b");
        fs::create_dir_all(root.join(STATE_DIR_NAME)).expect("state dir");
        fs::create_dir_all(&nested).expect("nested");

        let resolved =
            resolve_paths_with_lookup(&context(&nested), &PathOverrides::default(), |_| None).expect("resolve");
        assert_eq!(resolved.project_root, root);
        assert_eq!(resolved.root_source, ValueSource::Heuristic);
    }

    #[test]
    fn init_creates_layout_config_and_schema() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());

        let report = init_layout(&paths, &InitOptions::default()).expect("init");
        assert_eq!(report.created_dirs.len(), 3);
        assert!(report.wrote_config);
        assert_eq!(report.applied_migrations, schema::LATEST_VERSION as usize);

        let status = inspect_runtime(&paths).expect("inspect");
        assert!(status.db_exists);
        assert_eq!(status.pending_migrations, 0);
        ensure_runtime_ready(&paths, &status).expect("ready");

        let config = load_config(&paths.config_path).expect("load materialized");
        assert_eq!(config, GeowikiConfig::default());
    }

    #[test]
    fn init_keeps_an_existing_config_unless_forced() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        init_layout(&paths, &InitOptions::default()).expect("first init");
        fs::write(&paths.config_path, "[nearby]\nlimit = 5\n").expect("edit config");

        let again = init_layout(&paths, &InitOptions::default()).expect("second init");
        assert!(!again.wrote_config);
        assert!(again.created_dirs.is_empty());
        assert_eq!(again.applied_migrations, 0);

        let forced = init_layout(
            &paths,
            &InitOptions {
                force: true,
                ..InitOptions::default()
            },
        )
        .expect("forced init");
        assert!(forced.wrote_config);
        let config = load_config(&paths.config_path).expect("load");
        assert_eq!(config.nearby.limit, None);
    }

    #[test]
    fn uninitialized_project_is_not_ready() {
        let temp = tempdir().expect("tempdir");
        let paths = test_paths(temp.path());
        let status = inspect_runtime(&paths).expect("inspect");
        assert!(!status.db_exists);
        assert_eq!(status.warnings.len(), 3);
        let err = ensure_runtime_ready(&paths, &status).expect_err("must fail");
        assert!(err.to_string().contains("geowiki init"));
    }
}
