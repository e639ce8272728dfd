//! Pyramid Edge - image pyramids behind a signed-cookie CDN.
//!
//! This binary starts the HTTP server and provides one-off derivation and
//! credential tooling.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pyramid_edge::{
    config::{
        Cli, Command, DeriveConfig, IssueConfig, IssueOutputFormat, ServeConfig, StorageArgs,
        StorageBackend, VerifyConfig,
    },
    create_s3_client,
    server::{create_router, AppState, CookieSettings, RouterConfig},
    BlobStore, CachedMetadataStore, CookieOptions, DerivationPipeline, DerivationWorker,
    EdgeCredential, EdgeVerifier, IngestMode, IngestService, LocalBlobStore, LocalMetadataStore,
    MemoryBlobStore, MemoryMetadataStore, MetadataStore, Principal, PyramidPublisher,
    S3BlobStore, S3MetadataStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Derive(config) => run_derive(config).await,
        Command::Issue(config) => run_issue(config),
        Command::Verify(config) => run_verify(config),
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Build the blob and metadata stores for the configured backend.
async fn build_stores(storage: &StorageArgs) -> (Arc<dyn BlobStore>, Arc<dyn MetadataStore>) {
    match storage.storage {
        StorageBackend::S3 => {
            let client =
                create_s3_client(storage.s3_endpoint.as_deref(), &storage.s3_region).await;
            let blobs = S3BlobStore::with_prefix(
                client.clone(),
                storage.bucket(),
                storage.s3_prefix.clone(),
            );
            let metadata = S3MetadataStore::new(
                client,
                storage.bucket(),
                Some(storage.metadata_prefix.clone()),
            );
            (Arc::new(blobs), Arc::new(metadata))
        }
        StorageBackend::Local => {
            let root = storage.local_root.clone().unwrap_or_default();
            (
                Arc::new(LocalBlobStore::new(&root)),
                Arc::new(LocalMetadataStore::new(&root, &storage.metadata_prefix)),
            )
        }
        StorageBackend::Memory => (
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryMetadataStore::new()),
        ),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Pyramid Edge v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    match config.storage.storage {
        StorageBackend::S3 => {
            info!("  Storage: s3://{}", config.storage.bucket());
            if let Some(ref endpoint) = config.storage.s3_endpoint {
                info!("  S3 endpoint: {}", endpoint);
            }
            info!("  S3 region: {}", config.storage.s3_region);
        }
        StorageBackend::Local => {
            info!(
                "  Storage: {}",
                config.storage.local_root.clone().unwrap_or_default().display()
            );
        }
        StorageBackend::Memory => {
            warn!("  Storage: in-memory - all images are lost on exit");
        }
    }
    info!("  Ingest mode: {:?}", config.ingest_mode);

    if config.auth_enabled {
        info!("  Auth: enabled");
    } else {
        warn!("  Auth: DISABLED - all endpoints are publicly accessible");
        warn!("        Enable for production: --auth-enabled=true --session-secret=<secret>");
    }

    let (blobs, metadata) = build_stores(&config.storage).await;
    let metadata: Arc<dyn MetadataStore> = Arc::new(CachedMetadataStore::with_capacity(
        metadata,
        config.cache_metadata,
    ));

    let pipeline = DerivationPipeline::new(PyramidPublisher::new(blobs, metadata.clone()));
    let ingest = match config.ingest_mode {
        IngestMode::Inline => IngestService::inline(pipeline),
        IngestMode::Deferred => {
            let (worker, queue) = DerivationWorker::new(
                pipeline.clone(),
                config.queue_capacity,
                config.worker_attempts,
            );
            worker.spawn();
            IngestService::deferred(pipeline, queue)
        }
    };

    let mut state = AppState::new(ingest, metadata).with_cookies(CookieSettings {
        domain: config.cookie_domain.clone(),
        insecure: config.insecure_cookies,
    });

    if config.signing.is_configured() {
        match config.signing.build_issuer() {
            Ok(issuer) => {
                info!(
                    "  Edge credentials: key pair {} for {}",
                    issuer.key_pair_id(),
                    issuer.distribution()
                );
                state = state
                    .with_issuer(issuer)
                    .with_scope(config.signing.scope());
            }
            Err(e) => {
                error!("Configuration error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        warn!("  Edge credentials: no signing key configured, issuance will fail");
    }

    let router = create_router(state, build_router_config(&config));
    let addr = config.bind_address();

    info!("");
    info!("  Server listening on: http://{}", addr);
    info!("    curl http://{}/health", addr);
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "pyramid_edge=debug,tower_http=debug"
    } else {
        "pyramid_edge=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = if config.auth_enabled {
        RouterConfig::new(config.session_secret_or_empty())
    } else {
        RouterConfig::without_auth()
    };

    router_config = router_config.with_max_upload_bytes(config.max_upload_bytes());

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

// =============================================================================
// Derive Command
// =============================================================================

async fn run_derive(config: DeriveConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let bytes = match tokio::fs::read(&config.input).await {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            error!("Failed to read {}: {}", config.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let (blobs, metadata) = build_stores(&config.storage).await;
    let ingest = IngestService::inline(DerivationPipeline::new(PyramidPublisher::new(
        blobs, metadata,
    )));

    match ingest.ingest(&config.container, bytes).await {
        Ok(outcome) => match serde_json::to_string_pretty(&outcome) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to render outcome: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!("Derivation failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Issue Command
// =============================================================================

fn run_issue(config: IssueConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let issuer = match config.signing.build_issuer() {
        Ok(issuer) => issuer,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let source = match config.source_range() {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let issued = match issuer.issue_at(
        &Principal::new(config.principal.clone()),
        &config.signing.scope(),
        source,
        SystemTime::now(),
    ) {
        Ok(issued) => issued,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match config.format {
        IssueOutputFormat::Json => match serde_json::to_string_pretty(&issued) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        IssueOutputFormat::Cookies => {
            let mut options = CookieOptions::new(issued.expires_in);
            if let Some(ref domain) = config.cookie_domain {
                options = options.with_domain(domain.clone());
            }
            for cookie in issued.credential.set_cookie_headers(&options) {
                println!("{}", cookie);
            }
        }
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Verify Command
// =============================================================================

fn run_verify(config: VerifyConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let pem = match std::fs::read_to_string(&config.public_key_file) {
        Ok(pem) => pem,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", config.public_key_file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let verifier = match EdgeVerifier::new().with_pem(config.key_pair_id.clone(), &pem) {
        Ok(verifier) => verifier,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let credential = match EdgeCredential::from_cookie_header(&config.cookie) {
        Ok(credential) => credential,
        Err(e) => {
            println!("✗ rejected: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    match verifier.verify(&credential, &config.resource, config.source_ip, now) {
        Ok(policy) => {
            println!("✓ accepted");
            println!("  Resource pattern: {}", policy.resource);
            println!(
                "  Expires at: {} ({}s remaining)",
                policy.expires_at,
                policy.expires_at.saturating_sub(now)
            );
            if let Some(range) = policy.source_ip {
                println!("  Source range: {}", range);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("✗ rejected: {}", e);
            ExitCode::FAILURE
        }
    }
}
