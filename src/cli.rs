use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP API.
    Serve {
        /// Address to listen on, e.g. 127.0.0.1:8080.
        /// Overrides `listen` from config.yaml.
        #[clap(short, long)]
        listen: Option<String>,
    },

    /// Embed blocks that have no embedding or whose text
    /// changed since they were embedded.
    Reindex {
        /// Only this page
        #[clap(short, long)]
        page: Option<u64>,
    },

    /// Find blocks related to a query and print them as json
    Search {
        /// User id from config.yaml
        #[clap(short, long)]
        user: String,

        query: String,
    },

    /// Ask a question about your notes
    Ask {
        /// User id from config.yaml
        #[clap(short, long)]
        user: String,

        message: String,
    },
}
