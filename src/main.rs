use clap::{Parser, Subcommand};
use notebook_qa::Result;
use notebook_qa::commands::{
    add_source, create_notebook, delete_notebook, delete_source, edit_answer, list_answers,
    list_notebooks, list_sources, refresh_source, reindex, run_query, select_source,
    submit_feedback,
};
use notebook_qa::config::show_config;
use notebook_qa::database::SourceType;

#[derive(Parser)]
#[command(name = "notebook-qa")]
#[command(about = "Self-learning question answering over notebooks of curated sources")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the active configuration
    Config,
    /// Manage notebooks
    Notebook {
        #[command(subcommand)]
        command: NotebookCommands,
    },
    /// Manage sources inside a notebook
    Source {
        #[command(subcommand)]
        command: SourceCommands,
    },
    /// Ask a question against a notebook's selected sources
    Query {
        /// Notebook ID
        notebook: String,
        /// The question to answer
        question: String,
        /// Restrict to specific source IDs (comma-separated)
        #[arg(long, value_delimiter = ',')]
        sources: Option<Vec<i64>>,
    },
    /// Mark an answer helpful or unhelpful
    Feedback {
        /// Query ID returned by a previous query
        query_id: i64,
        /// Whether the answer was helpful
        #[arg(action = clap::ArgAction::Set, value_parser = clap::value_parser!(bool))]
        helpful: bool,
    },
    /// Overwrite an answer with a correction
    Edit {
        /// Query ID returned by a previous query
        query_id: i64,
        /// The corrected answer text
        answer: String,
        /// Rebind the answer to these source IDs (comma-separated)
        #[arg(long, value_delimiter = ',')]
        sources: Option<Vec<i64>>,
    },
    /// List promoted answers for a notebook, most used first
    Answers {
        /// Notebook ID
        notebook: String,
    },
    /// Rebuild chunks and embeddings for a notebook
    Reindex {
        /// Notebook ID
        notebook: String,
    },
}

#[derive(Subcommand)]
enum NotebookCommands {
    /// Create a new notebook
    Create {
        /// Display name
        name: String,
        /// Owner identity
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// List notebooks
    List {
        /// Only show notebooks for this owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Delete a notebook and everything it owns
    Delete {
        /// Notebook ID
        notebook: String,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// Add a source to a notebook (created if missing)
    Add {
        /// Notebook ID
        notebook: String,
        /// Source name
        name: String,
        /// Source type (text, file, website, video-transcript, image, drive)
        #[arg(long, default_value = "text")]
        r#type: SourceType,
        /// Literal content
        #[arg(long, conflicts_with = "file")]
        content: Option<String>,
        /// Read content from a file
        #[arg(long)]
        file: Option<std::path::PathBuf>,
        /// Retrieval URL for refreshable sources
        #[arg(long)]
        url: Option<String>,
    },
    /// List sources with their selection flags
    List {
        /// Notebook ID
        notebook: String,
    },
    /// Include or exclude a source from default query selections
    Select {
        /// Source ID
        source_id: i64,
        /// true to include, false to exclude
        #[arg(value_parser = clap::value_parser!(bool))]
        selected: bool,
    },
    /// Delete a source
    Delete {
        /// Notebook ID
        notebook: String,
        /// Source ID
        source_id: i64,
    },
    /// Re-fetch an externally-refreshable source
    Refresh {
        /// Notebook ID
        notebook: String,
        /// Source ID
        source_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config => {
            show_config()?;
        }
        Commands::Notebook { command } => match command {
            NotebookCommands::Create { name, owner } => create_notebook(name, owner).await?,
            NotebookCommands::List { owner } => list_notebooks(owner).await?,
            NotebookCommands::Delete { notebook } => delete_notebook(notebook).await?,
        },
        Commands::Source { command } => match command {
            SourceCommands::Add {
                notebook,
                name,
                r#type,
                content,
                file,
                url,
            } => add_source(notebook, r#type, name, content, file, url).await?,
            SourceCommands::List { notebook } => list_sources(notebook).await?,
            SourceCommands::Select {
                source_id,
                selected,
            } => select_source(source_id, selected).await?,
            SourceCommands::Delete {
                notebook,
                source_id,
            } => delete_source(notebook, source_id).await?,
            SourceCommands::Refresh {
                notebook,
                source_id,
            } => refresh_source(notebook, source_id).await?,
        },
        Commands::Query {
            notebook,
            question,
            sources,
        } => run_query(notebook, question, sources).await?,
        Commands::Feedback { query_id, helpful } => submit_feedback(query_id, helpful).await?,
        Commands::Edit {
            query_id,
            answer,
            sources,
        } => edit_answer(query_id, answer, sources).await?,
        Commands::Answers { notebook } => list_answers(notebook).await?,
        Commands::Reindex { notebook } => reindex(notebook).await?,
    }

    Ok(())
}
