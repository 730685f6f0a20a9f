use std::env;
use std::sync::Arc;
use std::time::Duration;

use inmuebles_ingest::crawlers::fincaraiz::FincaRaizCrawler;
use inmuebles_ingest::db::establish_connection_pool;
use inmuebles_ingest::models::config::{DEFAULT_CONFIG_PATH, Settings};
use inmuebles_ingest::processing::embedding::build_embedder;
use inmuebles_ingest::processing::{JobContext, ZMQMessage, process_message};
use inmuebles_ingest::repository::DieselRepository;
use inmuebles_ingest::vector_store::qdrant::QdrantVectorStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config_path =
        env::var("INMUEBLES_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let settings = match Settings::load(&config_path) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let pool = match establish_connection_pool(&settings.database_url) {
        Ok(pool) => pool,
        Err(e) => {
            log::error!("Failed to establish database connection: {e}");
            std::process::exit(1);
        }
    };

    let vectors = match QdrantVectorStore::connect(&settings.vector_store) {
        Ok(store) => store,
        Err(e) => {
            log::error!("Failed to connect to vector store: {e}");
            std::process::exit(1);
        }
    };

    let embedder = match build_embedder(&settings.embedding) {
        Ok(embedder) => embedder,
        Err(e) => {
            log::error!("Failed to set up embedder: {e}");
            std::process::exit(1);
        }
    };

    let source = match FincaRaizCrawler::new(
        &settings.source.base_url,
        &settings.source.site_url,
        Duration::from_secs(settings.source.timeout_secs),
    ) {
        Ok(crawler) => crawler,
        Err(e) => {
            log::error!("Failed to build crawler: {e}");
            std::process::exit(1);
        }
    };

    let ctx = Arc::new(JobContext {
        repo: DieselRepository::new(pool),
        source: Arc::new(source),
        embedder,
        vectors: Arc::new(vectors),
        settings,
    });

    // One-shot mode: run the job given as the first argument and exit.
    if let Some(arg) = env::args().nth(1) {
        let code = match serde_json::from_str::<ZMQMessage>(&arg) {
            Ok(msg) => {
                if process_message(msg, &ctx).await {
                    0
                } else {
                    1
                }
            }
            Err(e) => {
                log::error!("Failed to parse job argument: {e}");
                2
            }
        };
        std::process::exit(code);
    }

    let context = zmq::Context::new();
    let responder = match context.socket(zmq::PULL) {
        Ok(socket) => socket,
        Err(e) => {
            log::error!("Cannot create zmq socket: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = responder.bind(&ctx.settings.zmq_address) {
        log::error!("Cannot bind to {}: {e}", ctx.settings.zmq_address);
        std::process::exit(1);
    }
    log::info!("Listening for jobs on {}", ctx.settings.zmq_address);

    loop {
        let msg = match responder.recv_bytes(0) {
            Ok(msg) => msg,
            Err(e) => {
                log::error!("Failed to receive message: {e}");
                continue;
            }
        };
        match serde_json::from_slice::<ZMQMessage>(&msg) {
            Ok(parsed) => {
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    process_message(parsed, &ctx).await;
                });
            }
            Err(e) => log::error!("Failed to parse JSON: {e}"),
        }
    }
}
