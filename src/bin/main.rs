use bord::config::Config;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    bord::init_tracing();

    let config = Config::load()?;
    bord::start_server(config).await
}
