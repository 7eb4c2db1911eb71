use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "livepreview",
    version,
    about = "Generation-to-preview pipeline - streamed model output to a live, crash-contained UI preview",
    after_help = "State lives in .livepreview/ under the current directory. Run 'livepreview init' first. \
                  Set RUST_LOG=debug to see per-frame progress on stderr."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create .livepreview/ with an empty project store and default config.toml.
    Init,

    /// Create a new, empty project and print its id.
    New {
        /// Project name
        name: String,
        /// Owner recorded on the project (default: [owner] name from config)
        #[arg(long)]
        owner: Option<String>,
    },

    /// List projects with file counts and credit totals.
    List,

    /// Delete a project with its files, chat history and turn flag.
    Delete {
        /// Project id
        id: String,
    },

    /// Import a source directory into a project (respects .gitignore).
    Import {
        /// Project id
        id: String,
        /// Directory to read
        dir: String,
    },

    /// List a project's files, or print one file's content.
    Files {
        /// Project id
        id: String,
        /// Print only this file
        #[arg(long)]
        path: Option<String>,
    },

    /// Show a project's chat history.
    History {
        /// Project id
        id: String,
    },

    /// Run one generation turn against the configured completion endpoint.
    ///
    /// Streamed file records are applied when the turn completes. A transport
    /// failure leaves the project's files untouched.
    Generate {
        /// Project id (or the new project's name with --new)
        id: String,
        /// Prompt text
        prompt: String,
        /// Reference image (png, jpg, gif, webp)
        #[arg(long)]
        image: Option<String>,
        /// Model id (default: [completion] model from config)
        #[arg(long)]
        model: Option<String>,
        /// Create a project named ID and run the turn against it
        #[arg(long, conflicts_with = "resume")]
        new: bool,
        /// Discard an interrupted turn's flag once older than [phases] turn_stale_after_ms
        #[arg(long)]
        resume: bool,
    },

    /// Run one generation turn from a recorded frames file.
    Replay {
        /// Project id
        id: String,
        /// Recorded NDJSON / SSE frames
        frames: String,
        /// Prompt text recorded in the chat history
        #[arg(long, default_value = "(replay)")]
        prompt: String,
        /// Deliver the recording in chunks of this many bytes
        #[arg(long, default_value = "64")]
        chunk_size: usize,
        /// Discard an interrupted turn's flag once older than [phases] turn_stale_after_ms
        #[arg(long)]
        resume: bool,
    },

    /// Print the module-free form of one source file.
    Normalize {
        /// File to normalize ("-" reads stdin)
        file: String,
    },

    /// Assemble a project's preview document.
    Assemble {
        /// Project id
        id: String,
        /// Write the HTML here instead of printing the report only
        #[arg(short, long)]
        out: Option<String>,
        /// Wrap the document in a sandboxed iframe
        #[arg(long)]
        embed: bool,
    },

    /// Assemble a project and render it in the headless sandbox.
    Preview {
        /// Project id
        id: String,
    },

    /// Write a project's files to a directory.
    Export {
        /// Project id
        id: String,
        /// Destination directory
        dir: String,
    },
}
