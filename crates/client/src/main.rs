//! Command-line entry point: drive the client core against a live server.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};

use codegrade_auth::presets::{
    MANAGE_ASSIGNMENT_PERMISSIONS, MANAGE_GENERAL_COURSE_PERMISSIONS, MANAGE_SITE_PERMISSIONS,
    manage_course_permissions, query_for,
};
use codegrade_auth::{Credentials, PermissionQuery, PermissionScope};
use codegrade_client::{ClientConfig, CodeGradeClient};
use codegrade_core::CourseId;

#[derive(Debug, Parser)]
#[command(name = "codegrade-client", about = "CodeGrade session and permission client")]
struct Cli {
    /// Base URL of the CodeGrade server.
    #[arg(long, env = "CODEGRADE_API_URL")]
    api_url: Option<String>,

    /// SQLite file holding the session and permission cache.
    #[arg(long, env = "CODEGRADE_STORE_PATH")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Log in and remember the session.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CODEGRADE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Re-establish the remembered session and print who is logged in.
    Whoami,
    /// Log out and forget cached permissions.
    Logout,
    /// Check permissions, globally or within a course.
    Check {
        #[arg(long)]
        course: Option<u64>,
        /// Check a named group instead of individual permissions.
        #[arg(long, value_enum, conflicts_with = "names")]
        preset: Option<Preset>,
        #[arg(required_unless_present = "preset")]
        names: Vec<String>,
    },
    /// Drop all cached permissions.
    ClearCache,
}

/// Permission groups the course and site management pages ask about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Preset {
    ManageAssignment,
    ManageGeneralCourse,
    ManageCourse,
    ManageSite,
}

impl Preset {
    fn query(self) -> PermissionQuery {
        match self {
            Preset::ManageAssignment => query_for(MANAGE_ASSIGNMENT_PERMISSIONS),
            Preset::ManageGeneralCourse => query_for(MANAGE_GENERAL_COURSE_PERMISSIONS),
            Preset::ManageCourse => PermissionQuery::as_map(manage_course_permissions()),
            Preset::ManageSite => query_for(MANAGE_SITE_PERMISSIONS),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    codegrade_observability::init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    if let Some(store) = cli.store {
        config.store_path = Some(store);
    }

    let client = CodeGradeClient::from_config(&config)?;
    let session = client.session();

    match cli.command {
        Command::Login { email, password } => {
            let credentials = Credentials::new(email, password)?;
            let user = session.login(&credentials).await.context("login failed")?;
            println!("logged in as {} <{}> (id {})", user.name, user.email, user.id);
        }
        Command::Whoami => match session.verify_login().await {
            Ok(user) => println!("{} <{}> (id {})", user.name, user.email, user.id),
            Err(err) => bail!("not logged in: {err}"),
        },
        Command::Logout => {
            session.logout().await.context("logout failed")?;
            println!("logged out");
        }
        Command::Check {
            course,
            preset,
            names,
        } => {
            if let Err(err) = session.verify_login().await {
                tracing::warn!(error = %err, "continuing without a verified session");
            }
            let scope = PermissionScope::from(course.map(CourseId::new));
            let query = match preset {
                Some(preset) => preset.query(),
                None => PermissionQuery::as_map(names),
            };
            let answer = client.permissions().has_permission(&query, scope).await;
            println!("{}", serde_json::to_string_pretty(&answer)?);
        }
        Command::ClearCache => {
            client
                .permissions()
                .clear_cache()
                .await
                .context("failed to clear permission cache")?;
            println!("permission cache cleared");
        }
    }

    Ok(())
}
