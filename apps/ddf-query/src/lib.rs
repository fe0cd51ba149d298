use std::{io::Write, path::PathBuf};

use clap::Parser;
use color_eyre::eyre;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use ddf_config::Config;
use ddf_search::{
	Federation, Query, QueryEvent, QueryModel, SearchContext, SearchOptions, SearchOutcome,
};

#[derive(Debug, Parser)]
#[command(
	version = ddf_cli::VERSION,
	rename_all = "kebab",
	styles = ddf_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	/// Query text. Defaults to matching everything.
	#[arg(long, value_name = "CQL")]
	pub cql: Option<String>,
	/// local, enterprise or selected. Implied to be selected when --source is given.
	#[arg(long, value_name = "SCOPE")]
	pub federation: Option<String>,
	#[arg(long = "source", value_name = "ID")]
	pub sources: Vec<String>,
	/// Server pages to walk through.
	#[arg(long, default_value_t = 1)]
	pub pages: u32,
	/// Search locally first and widen only if one of these ids is missing.
	#[arg(long = "tiered-id", value_name = "ID")]
	pub tiered_ids: Vec<String>,
	#[arg(long, conflicts_with = "historic")]
	pub deleted: bool,
	#[arg(long)]
	pub historic: bool,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = ddf_config::load(&args.config)?;

	init_tracing(&config)?;

	let stdout = std::io::stdout();
	let mut out = stdout.lock();

	execute(&args, &config, &mut out).await
}

/// Runs the search described by `args` and writes one JSON document per page to `out`.
pub async fn execute(args: &Args, config: &Config, out: &mut impl Write) -> color_eyre::Result<()> {
	let query = build_query(args, config)?;
	let ctx = SearchContext::from_config(config)?;
	let mut model = QueryModel::new(query, ctx);
	let mut events = model.subscribe();
	let reporter = tokio::spawn(async move {
		while let Some(event) = events.recv().await {
			match event {
				QueryEvent::Warning { title, message } => {
					tracing::warn!(%title, %message, "Search warning.");
				},
				QueryEvent::AuthenticationRequired { source_id, url } => {
					tracing::warn!(
						%source_id,
						url = url.as_deref().unwrap_or("unknown"),
						"Source requires authentication."
					);
				},
				_ => {},
			}
		}
	});
	let options = SearchOptions {
		limit_to_deleted: args.deleted,
		limit_to_historic: args.historic,
		..SearchOptions::default()
	};
	let outcome = if args.tiered_ids.is_empty() {
		model.start_search(options).await?
	} else {
		let tiered = model.start_tiered_search(&args.tiered_ids).await?;

		if tiered.escalated {
			tracing::info!("Requested records were not local. Searched every source.");
		}

		tiered.outcome
	};

	if matches!(outcome, SearchOutcome::Dispatched { .. }) {
		for page in 1..=args.pages.max(1) {
			model.wait_until_settled().await;

			write_page(out, &model, page)?;

			if page == args.pages || !model.has_next_server_page() {
				break;
			}

			model.get_next_server_page().await?;
		}
	} else {
		tracing::warn!(outcome = ?outcome, "Nothing was searched.");
	}

	drop(model);

	reporter.await?;

	Ok(())
}

pub fn build_query(args: &Args, config: &Config) -> color_eyre::Result<Query> {
	let mut query = Query::with_defaults("ddf-query", &config.search)?;

	if let Some(cql) = &args.cql {
		query.filter = ddf_cql::parse(cql)?;
	}
	if !args.sources.is_empty() {
		query.sources = args.sources.clone();
		query.federation = Federation::Selected;
	}
	if let Some(raw) = &args.federation {
		query.federation = Federation::parse(raw)
			.ok_or_else(|| eyre::eyre!("--federation must be local, enterprise or selected."))?;
	}

	Ok(query)
}

fn write_page(out: &mut impl Write, model: &QueryModel, page: u32) -> color_eyre::Result<()> {
	let records = model.results().map(|results| results.records()).unwrap_or_default();
	let statuses: Vec<_> = model.statuses().iter().collect();
	let doc = json!({
		"page": page,
		"range": model.results_range_label(records.len()),
		"totalHits": model.total_hits(),
		"statuses": statuses,
		"results": records,
	});

	writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;

	Ok(())
}

fn init_tracing(config: &Config) -> color_eyre::Result<()> {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();

	Ok(())
}
