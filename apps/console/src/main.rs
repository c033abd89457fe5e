use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console_core::{
    ClientEvent, ClientOptions, FeedbackDraft, HttpTransport, KnowledgeDraft, SchemaMappingDraft,
    TicketUpload, TriageClient,
};
use serde::Serialize;
use serde_json::Value;
use shared::domain::{
    AssessmentId, ClusterId, ClusterStatus, FeedbackRating, KnowledgeSourceType,
    SchemaMappingId, SchemaSourceType,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, Overrides, Settings};

#[derive(Parser, Debug)]
#[command(name = "triage-console", about = "Operator console for ticket triage")]
struct Args {
    /// Config file; `console.toml` in the working directory is read if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[arg(long, global = true)]
    email: Option<String>,
    #[arg(long, global = true)]
    password: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dashboard totals and recent activity.
    Dashboard,
    Clusters {
        #[arg(long)]
        status: Option<ClusterStatus>,
    },
    Cluster {
        id: ClusterId,
    },
    RunClustering,
    Assessments {
        #[arg(long)]
        cluster: Option<ClusterId>,
    },
    /// Ask the assistant a question about a cluster.
    Ask {
        cluster: ClusterId,
        question: String,
    },
    Feedback {
        assessment: AssessmentId,
        #[arg(long)]
        rating: FeedbackRating,
        #[arg(long)]
        corrected_answer: Option<String>,
        #[arg(long)]
        comments: Option<String>,
    },
    /// Clusters waiting for review.
    Approvals,
    Approve {
        id: ClusterId,
        #[arg(long)]
        comments: Option<String>,
    },
    Reject {
        id: ClusterId,
        #[arg(long)]
        reason: String,
    },
    Knowledge,
    AddKnowledge {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        source_type: Option<KnowledgeSourceType>,
    },
    /// Upload a ticket export (.csv, .xlsx, .xls or .json).
    Upload {
        file: PathBuf,
        #[arg(long)]
        schema_mapping: Option<SchemaMappingId>,
    },
    SchemaMappings,
    CreateSchemaMapping {
        #[arg(long)]
        name: String,
        #[arg(long)]
        source_type: SchemaSourceType,
        /// Canonical field to source column, as `field=column`.
        #[arg(long = "map", value_parser = parse_mapping)]
        mappings: Vec<(String, String)>,
    },
}

fn parse_mapping(raw: &str) -> Result<(String, String), String> {
    let (field, column) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected field=column, got {raw:?}"))?;
    Ok((field.trim().to_string(), column.trim().to_string()))
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let settings = load_settings(
        args.config.as_deref(),
        Overrides {
            api_url: args.api_url,
            email: args.email,
            password: args.password,
        },
    )?;
    init_tracing(&settings);
    debug!(api = %settings.api_base_url, "settings loaded");

    let transport = HttpTransport::new(&settings.api_base_url, settings.request_timeout())?;
    let client = TriageClient::with_options(
        Arc::new(transport),
        ClientOptions {
            stale_after: settings.stale_after(),
            ..ClientOptions::default()
        },
    );
    let mut events = client.subscribe_events();

    let outcome = run(&client, &settings, args.command).await;
    let reported_failure = report_events(&mut events);

    match outcome {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            if !reported_failure {
                eprintln!("error: {err:#}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Prints every notification raised during the run. Returns whether one of
/// them was a failure.
fn report_events(events: &mut broadcast::Receiver<ClientEvent>) -> bool {
    let mut failed = false;
    loop {
        match events.try_recv() {
            Ok(ClientEvent::ActionFailed { message, .. }) => {
                eprintln!("{message}");
                failed = true;
            }
            Ok(ClientEvent::ActionSucceeded { message, .. }) => eprintln!("{message}"),
            Ok(ClientEvent::SignedOut { reason }) => debug!(%reason, "signed out"),
            Ok(ClientEvent::SignedIn(user)) => debug!(user = %user.email, "signed in"),
            Err(TryRecvError::Lagged(skipped)) => debug!(skipped, "notifications dropped"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return failed,
        }
    }
}

fn json<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

async fn read_upload(path: &Path, schema_mapping_id: Option<SchemaMappingId>) -> Result<TicketUpload> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("'{}' has no file name", path.display()))?
        .to_string();
    Ok(TicketUpload {
        filename,
        bytes,
        schema_mapping_id,
    })
}

async fn run(client: &TriageClient, settings: &Settings, command: Command) -> Result<Value> {
    let (email, password) = settings.credentials()?;
    client.login(email, password).await?;

    match command {
        Command::Dashboard => json(client.analytics().await?),
        Command::Clusters { status } => json(client.clusters(status).await?),
        Command::Cluster { id } => json(client.cluster(&id).await?),
        Command::RunClustering => json(client.run_clustering().await?),
        Command::Assessments { cluster } => json(client.assessments(cluster.as_ref()).await?),
        Command::Ask { cluster, question } => {
            json(client.generate_assessment(&cluster, &question).await?)
        }
        Command::Feedback {
            assessment,
            rating,
            corrected_answer,
            comments,
        } => {
            let mut draft = FeedbackDraft::new(assessment, rating);
            if let Some(answer) = corrected_answer {
                draft = draft.with_corrected_answer(answer);
            }
            if let Some(comments) = comments {
                draft = draft.with_comments(comments);
            }
            json(client.submit_feedback(draft).await?)
        }
        Command::Approvals => json(client.pending_approvals().await?),
        Command::Approve { id, comments } => json(client.approve_cluster(&id, comments).await?),
        Command::Reject { id, reason } => json(client.reject_cluster(&id, &reason).await?),
        Command::Knowledge => json(client.knowledge().await?),
        Command::AddKnowledge {
            title,
            content,
            tags,
            source_type,
        } => {
            let draft = KnowledgeDraft::new(title, content)
                .with_tags(tags)
                .with_source_type(source_type.unwrap_or_default());
            json(client.add_knowledge(draft).await?)
        }
        Command::Upload {
            file,
            schema_mapping,
        } => {
            let upload = read_upload(&file, schema_mapping).await?;
            json(client.upload_tickets(upload).await?)
        }
        Command::SchemaMappings => json(client.schema_mappings().await?),
        Command::CreateSchemaMapping {
            name,
            source_type,
            mappings,
        } => {
            let draft = mappings
                .into_iter()
                .fold(SchemaMappingDraft::new(name, source_type), |draft, (field, column)| {
                    draft.map(field, column)
                });
            json(client.create_schema_mapping(draft).await?)
        }
    }
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
