use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = ddf_query::Args::parse();

	ddf_query::run(args).await
}
