//! Relation tuple operations tool
//!
//! Runs engine operations against the PostgreSQL tuple store.
//!
//! Usage:
//!   rebac --database-url postgres://... check --object UserTask:42 --relation viewer --subject User:7
//!   rebac list-objects --namespace UserTask --relation viewer --subject User:7
//!   rebac write --object UserTask:42 --relation viewer --subject Team:3#member --editor 1
//!
//! Settings come from `--config` (TOML, YAML or JSON) and `REBAC_*`
//! environment variables; `--database-url` wins over both.

use anyhow::Context;
use auth_rebac::{
    init_tracing, CancellationSignal, CheckRequest, EngineSettings, EntityRef, ListObjectsRequest,
    Namespace, NewRelationship, PostgresTupleStore, RebacEngine, RebacError, Relation, Subject,
    TupleFilter, TupleKey,
};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rebac")]
#[command(about = "Inspect and edit relation tuples, and run authorization queries")]
struct Args {
    /// Settings file
    #[arg(long, env = "REBAC_CONFIG")]
    config: Option<PathBuf>,

    /// Database connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Override the configured maximum resolution depth
    #[arg(long)]
    max_depth: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations
    Migrate,

    /// Does SUBJECT hold RELATION on OBJECT?
    Check {
        #[arg(long)]
        object: EntityRef,
        #[arg(long, value_parser = parse_relation)]
        relation: Relation,
        #[arg(long)]
        subject: EntityRef,
    },

    /// Keys of all objects in NAMESPACE on which SUBJECT holds RELATION
    ListObjects {
        #[arg(long, value_parser = parse_namespace)]
        namespace: Namespace,
        #[arg(long, value_parser = parse_relation)]
        relation: Relation,
        #[arg(long)]
        subject: EntityRef,
    },

    /// Print the userset tree for RELATION on OBJECT as JSON
    Expand {
        #[arg(long)]
        object: EntityRef,
        #[arg(long, value_parser = parse_relation)]
        relation: Relation,
    },

    /// Write one tuple; SUBJECT is `Namespace:key` or `Namespace:key#relation`
    Write {
        #[arg(long)]
        object: EntityRef,
        #[arg(long, value_parser = parse_relation)]
        relation: Relation,
        #[arg(long)]
        subject: Subject,
        /// Key of the user recorded as last editor
        #[arg(long)]
        editor: i64,
        /// RFC 3339 start of validity
        #[arg(long)]
        valid_from: Option<DateTime<Utc>>,
        /// RFC 3339 end of validity (exclusive)
        #[arg(long)]
        valid_to: Option<DateTime<Utc>>,
    },

    /// Delete every row with this tuple identity
    Delete {
        #[arg(long)]
        object: EntityRef,
        #[arg(long, value_parser = parse_relation)]
        relation: Relation,
        #[arg(long)]
        subject: Subject,
    },

    /// Delete every tuple naming ENTITY as object or subject
    RemoveObject {
        #[arg(long)]
        entity: EntityRef,
    },

    /// Print stored tuples on OBJECT (all tuples when omitted) as JSON lines
    Read {
        #[arg(long)]
        object: Option<EntityRef>,
        #[arg(long, value_parser = parse_relation)]
        relation: Option<Relation>,
    },
}

fn parse_relation(value: &str) -> Result<Relation, RebacError> {
    Relation::new(value)
}

fn parse_namespace(value: &str) -> Result<Namespace, RebacError> {
    Namespace::new(value)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = EngineSettings::load(args.config.as_deref())?;
    if let Some(url) = args.database_url {
        settings.database_url = Some(url);
    }
    if let Some(max_depth) = args.max_depth {
        settings.resolver.max_depth = max_depth;
    }
    init_tracing(&settings.logging)?;

    let database_url = settings
        .database_url
        .as_deref()
        .context("no database URL: pass --database-url or set REBAC_DATABASE_URL")?;
    let store = PostgresTupleStore::from_connection_string(database_url, settings.max_connections).await?;

    if let Command::Migrate = args.command {
        store.migrate().await?;
        info!("✅ Migrations applied");
        return Ok(());
    }

    let engine = RebacEngine::new(Arc::new(store)).with_config(settings.resolver.clone())?;
    let cancel = CancellationSignal::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    match args.command {
        Command::Migrate => {}
        Command::Check {
            object,
            relation,
            subject,
        } => {
            let request = CheckRequest::new(object, relation, subject);
            let decision = engine.authorize(&request, &cancel).await?;
            println!("{}", serde_json::to_string(&decision)?);
        }
        Command::ListObjects {
            namespace,
            relation,
            subject,
        } => {
            let request = ListObjectsRequest::new(namespace, relation, subject);
            let keys = engine.list_objects(&request, &cancel).await?;
            println!("{}", serde_json::to_string(&keys)?);
        }
        Command::Expand { object, relation } => {
            let tree = engine.expand(&object, &relation, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        Command::Write {
            object,
            relation,
            subject,
            editor,
            valid_from,
            valid_to,
        } => {
            let relationship = NewRelationship::new(object, relation, subject, editor)
                .valid_between(valid_from, valid_to);
            let summary = engine.write_relationship(relationship).await?;
            info!(inserted = summary.inserted, "✅ Write complete");
        }
        Command::Delete {
            object,
            relation,
            subject,
        } => {
            let key = TupleKey {
                object,
                relation,
                subject,
            };
            let deleted = engine.delete_relationship(&key).await?;
            info!(deleted, "✅ Delete complete");
        }
        Command::RemoveObject { entity } => {
            let deleted = engine.remove_all_relationships_for_object(&entity).await?;
            info!(deleted, entity = %entity, "✅ Relationships removed");
        }
        Command::Read { object, relation } => {
            let mut filter = object
                .as_ref()
                .map(TupleFilter::for_object)
                .unwrap_or_default();
            if let Some(relation) = relation {
                filter = filter.with_relation(relation);
            }
            for tuple in engine.read_tuples(&filter).await? {
                println!("{}", serde_json::to_string(&tuple)?);
            }
        }
    }

    Ok(())
}
