use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use ddf_config::{Config, Error};

const SAMPLE_CONFIG_TEMPLATE_TOML: &str = include_str!("fixtures/sample_config.template.toml");

fn sample_toml_with(edit: impl FnOnce(&mut toml::Table)) -> String {
	let mut value: Value =
		toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.");
	let root = value.as_table_mut().expect("Template config must be a table.");

	edit(root);

	toml::to_string(&value).expect("Failed to render template config.")
}

fn section<'a>(root: &'a mut toml::Table, name: &str) -> &'a mut toml::Table {
	root.get_mut(name)
		.and_then(Value::as_table_mut)
		.unwrap_or_else(|| panic!("Template config must include [{name}]."))
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("ddf_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn load_payload(payload: String) -> ddf_config::Result<Config> {
	let path = write_temp_config(payload);
	let result = ddf_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	result
}

fn base_config() -> Config {
	load_payload(sample_toml_with(|_| {})).expect("Sample config must be valid.")
}

#[test]
fn sample_config_is_normalized() {
	let cfg = base_config();

	assert_eq!(cfg.catalog.api_base, "https://localhost:8993");
	assert_eq!(cfg.catalog.api_key, None);
	assert_eq!(cfg.search.federation, "enterprise");
	assert_eq!(cfg.sources.len(), 3);
	assert_eq!(cfg.sources[2].classification, "federated");
	assert!(!cfg.sources[2].available);
}

#[test]
fn timeout_must_be_positive() {
	let err = load_payload(sample_toml_with(|root| {
		section(root, "catalog").insert("timeout_ms".to_string(), Value::Integer(0));
	}))
	.expect_err("Expected timeout validation error.");

	assert!(
		err.to_string().contains("catalog.timeout_ms must be greater than zero."),
		"Unexpected error: {err}"
	);
}

#[test]
fn federation_must_be_known() {
	let mut cfg = base_config();

	cfg.search.federation = "galactic".to_string();

	let err = ddf_config::validate(&cfg).expect_err("Expected federation validation error.");

	assert!(
		err.to_string().contains("search.federation must be one of local, enterprise, or selected."),
		"Unexpected error: {err}"
	);
}

#[test]
fn local_catalog_must_be_a_local_source() {
	let mut cfg = base_config();

	cfg.search.local_catalog = "siteA".to_string();

	let err = ddf_config::validate(&cfg).expect_err("Expected local catalog validation error.");

	assert!(
		err.to_string().contains("search.local_catalog must name a source classified as local."),
		"Unexpected error: {err}"
	);

	cfg.search.local_catalog = "nowhere".to_string();

	let err = ddf_config::validate(&cfg).expect_err("Expected undeclared source error.");

	assert!(
		err.to_string().contains("search.local_catalog must name a declared source."),
		"Unexpected error: {err}"
	);
}

#[test]
fn source_ids_must_be_unique_and_not_cache() {
	let mut cfg = base_config();

	cfg.sources[1].id = "ddf.distribution".to_string();

	let err = ddf_config::validate(&cfg).expect_err("Expected duplicate source error.");

	assert!(matches!(err, Error::Validation { .. }));
	assert!(err.to_string().contains("declared more than once"), "Unexpected error: {err}");

	let mut cfg = base_config();

	cfg.sources[1].id = "cache".to_string();

	let err = ddf_config::validate(&cfg).expect_err("Expected reserved id error.");

	assert!(err.to_string().contains("sources.id 'cache' is reserved."), "Unexpected error: {err}");
}

#[test]
fn sort_direction_must_be_known() {
	let mut cfg = base_config();

	cfg.search.sorts[0].direction = "sideways".to_string();

	assert!(ddf_config::validate(&cfg).is_err());
}

#[test]
fn unreadable_path_reports_read_error() {
	let err = ddf_config::load(&env::temp_dir().join("ddf_config_missing_file.toml"))
		.expect_err("Expected read error.");

	assert!(matches!(err, Error::ReadConfig { .. }));
}
