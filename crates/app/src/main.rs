use chrono::Utc;
use clap::{Parser, Subcommand};
use ragvault_core::{
    CharacterNgramEmbedder, EmbeddingProvider, FormatLoader, HttpEmbedder, HttpEmbedderConfig,
    IndexSettings, IngestionConfig, IngestionOptions, IngestionPipeline, Metric, PipelineTimeouts,
    QueryPipeline, QueryRequest, QueryResponse, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_TOP_K,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ragvault", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector index file
    #[arg(long, env = "RAGVAULT_INDEX_PATH", default_value = "rag_index.json")]
    index_path: PathBuf,

    /// Similarity metric: cosine (higher is better) or euclidean (lower is better)
    #[arg(long, default_value = "cosine")]
    metric: Metric,

    /// Embedding dimension; must match the index
    #[arg(long, env = "RAGVAULT_EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    dimensions: usize,

    /// Base URL of an embeddings server; the offline n-gram embedder is used when unset
    #[arg(long, env = "RAGVAULT_EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Model name sent to the embeddings server
    #[arg(long, env = "RAGVAULT_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Bearer token for the embeddings server
    #[arg(long, env = "RAGVAULT_EMBEDDING_API_KEY")]
    embedding_api_key: Option<String>,

    /// Seconds allowed for one embedding call
    #[arg(long, default_value = "60")]
    embedding_timeout_secs: u64,

    /// Seconds allowed for writing the index
    #[arg(long, default_value = "30")]
    persist_timeout_secs: u64,

    /// Seconds to wait for the index writer lock
    #[arg(long, default_value = "30")]
    lock_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Load, chunk, embed and store documents into the index.
    Ingest {
        /// Files or folders to ingest (pdf, docx, csv, txt, md).
        #[arg(env = "FILE_PATH", required = true)]
        paths: Vec<PathBuf>,
        /// Maximum characters per chunk.
        #[arg(long, default_value = "1000")]
        chunk_size: usize,
        /// Characters shared by adjacent chunks.
        #[arg(long, default_value = "200")]
        chunk_overlap: usize,
        /// Characters searched before a cut for a natural boundary.
        #[arg(long)]
        boundary_lookahead: Option<usize>,
    },
    /// Assemble context for a query as a JSON object.
    Query {
        /// Query text.
        #[arg(long)]
        query: Option<String>,
        /// Number of chunks to return.
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        k: usize,
        /// Restrict results to these sources (repeatable).
        #[arg(long = "source")]
        sources: Vec<String>,
        /// JSON request `{query, k, sourceFilter}`; overrides the flags.
        #[arg(long, env = "QUERY_PAYLOAD")]
        payload: Option<String>,
    },
    /// Remove every record of the given sources.
    Delete {
        /// Source path or source id (repeatable).
        #[arg(long = "source", required = true)]
        sources: Vec<String>,
    },
    /// Print index size and sources.
    Stats,
}

impl Cli {
    fn index_settings(&self) -> IndexSettings {
        IndexSettings {
            path: self.index_path.clone(),
            dimension: self.dimensions,
            metric: self.metric,
        }
    }

    fn timeouts(&self) -> PipelineTimeouts {
        PipelineTimeouts {
            embedding: Duration::from_secs(self.embedding_timeout_secs),
            persistence: Duration::from_secs(self.persist_timeout_secs),
            lock: Duration::from_secs(self.lock_timeout_secs),
        }
    }

    fn embedder(&self) -> anyhow::Result<EmbeddingProvider> {
        let provider = match &self.embedding_endpoint {
            Some(endpoint) => EmbeddingProvider::Http(HttpEmbedder::new(HttpEmbedderConfig {
                endpoint: endpoint.clone(),
                model: self.embedding_model.clone(),
                api_key: self.embedding_api_key.clone(),
                dimensions: self.dimensions,
                timeout: Duration::from_secs(self.embedding_timeout_secs),
            })?),
            None => EmbeddingProvider::Ngram(CharacterNgramEmbedder {
                dimensions: self.dimensions,
            }),
        };
        Ok(provider)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index = %cli.index_path.display(),
        "ragvault boot"
    );

    match &cli.command {
        Command::Ingest {
            paths,
            chunk_size,
            chunk_overlap,
            boundary_lookahead,
        } => {
            let embedder = cli.embedder()?;
            info!(embedder = %embedder.describe(), "embedding provider");
            let pipeline = IngestionPipeline::new(
                FormatLoader,
                embedder,
                IngestionConfig {
                    options: IngestionOptions {
                        chunk_size: *chunk_size,
                        chunk_overlap: *chunk_overlap,
                        boundary_lookahead: *boundary_lookahead,
                    },
                    index: cli.index_settings(),
                    timeouts: cli.timeouts(),
                },
            )?;

            let report = pipeline.run(paths).await?;
            for skipped in &report.skipped {
                warn!(source = %skipped.source, reason = %skipped.reason, "skipped document");
            }

            println!("{}", serde_json::to_string_pretty(&report)?);
            info!(
                stored = report.stored,
                finished_at = %Utc::now().to_rfc3339(),
                "ingestion complete"
            );
        }
        Command::Query {
            query,
            k,
            sources,
            payload,
        } => {
            let response = match build_request(query.as_deref(), *k, sources, payload.as_deref()) {
                Ok(request) => run_query(&cli, &request).await,
                Err(reason) => QueryResponse::Error(reason),
            };

            println!("{}", serde_json::to_string(&response)?);
            if response.is_error() {
                std::process::exit(1);
            }
        }
        Command::Delete { sources } => {
            let sources: BTreeSet<String> = sources.iter().cloned().collect();
            let removed = cli
                .index_settings()
                .update(cli.timeouts().lock, |index| Ok(index.remove_sources(&sources)))?;

            println!("{}", json!({ "removed": removed }));
        }
        Command::Stats => {
            let index = cli.index_settings().open()?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "path": cli.index_path.display().to_string(),
                    "dimension": index.dimension(),
                    "metric": index.metric(),
                    "records": index.len(),
                    "sources": index.sources(),
                }))?
            );
        }
    }

    Ok(())
}

fn build_request(
    query: Option<&str>,
    k: usize,
    sources: &[String],
    payload: Option<&str>,
) -> Result<QueryRequest, String> {
    if let Some(payload) = payload {
        return serde_json::from_str(payload).map_err(|error| format!("invalid JSON payload: {error}"));
    }

    let query = query.ok_or_else(|| "no query provided".to_string())?;
    let mut request = QueryRequest::new(query, k);
    request.source_filter = sources.iter().cloned().collect();
    Ok(request)
}

async fn run_query(cli: &Cli, request: &QueryRequest) -> QueryResponse {
    let embedder = match cli.embedder() {
        Ok(embedder) => embedder,
        Err(error) => return QueryResponse::Error(error.to_string()),
    };

    match QueryPipeline::new(
        embedder,
        cli.index_settings(),
        Duration::from_secs(cli.embedding_timeout_secs),
    ) {
        Ok(pipeline) => pipeline.respond(request).await,
        Err(error) => QueryResponse::Error(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_overrides_flags() -> Result<(), String> {
        let request = build_request(
            Some("ignored"),
            3,
            &[],
            Some(r#"{"query":"pump seals","documentIds":["a.pdf"]}"#),
        )?;
        assert_eq!(request.query, "pump seals");
        assert_eq!(request.k, DEFAULT_TOP_K);
        assert!(request.source_filter.contains("a.pdf"));
        Ok(())
    }

    #[test]
    fn flags_build_request_with_sources() -> Result<(), String> {
        let request = build_request(Some("valves"), 2, &["b.txt".to_string()], None)?;
        assert_eq!(request.k, 2);
        assert_eq!(
            request.source_filter,
            BTreeSet::from(["b.txt".to_string()])
        );
        Ok(())
    }

    #[test]
    fn missing_query_or_bad_payload_is_an_error() {
        assert!(build_request(None, 5, &[], None).is_err());
        assert!(build_request(None, 5, &[], Some("{oops")).is_err());
    }

    #[test]
    fn cli_parses_ingest_and_query() {
        let cli = Cli::try_parse_from([
            "ragvault",
            "--metric",
            "euclidean",
            "--dimensions",
            "64",
            "ingest",
            "docs",
            "notes.txt",
            "--chunk-size",
            "500",
        ]);
        assert!(matches!(
            cli.as_ref().map(|cli| (cli.metric, cli.dimensions)),
            Ok((Metric::Euclidean, 64))
        ));
        assert!(matches!(
            cli.map(|cli| cli.command),
            Ok(Command::Ingest { ref paths, chunk_size: 500, chunk_overlap: 200, .. }) if paths.len() == 2
        ));

        let query = Cli::try_parse_from(["ragvault", "query", "--query", "x", "--source", "a"]);
        assert!(matches!(
            query.map(|cli| cli.command),
            Ok(Command::Query { k: DEFAULT_TOP_K, ref sources, .. }) if sources.len() == 1
        ));
    }
}
