use std::sync::Arc;

use anyhow::{bail, Error};
use clap::Parser;

use bucket_backup::backup::run_backup;
use bucket_backup::shell::run_shell;
use bucket_backup::store::{BlobStore, Credentials, GcsStore};

#[derive(Parser)]
#[command(name = "bucket-backup", version, about = "Content addressed backup into an object store bucket")]
struct Args {
    /// Comma separated absolute directories to back up
    #[arg(long, value_name = "PATHS")]
    directory: Option<String>,

    /// Bucket holding chunks and manifests
    #[arg(long)]
    bucket: String,

    /// Workflow to run
    #[arg(long, value_name = "backup|interactive")]
    mode: String,

    /// Apply recorded owner and group on restore
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    chown: bool,
}

fn main() -> Result<(), Error> {
    env_logger::init();
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;

    let credentials = Credentials::load("cred.json")?;
    let store: Arc<dyn BlobStore> = Arc::new(GcsStore::new(credentials, &args.bucket)?);

    match args.mode.as_str() {
        "backup" => {
            let directory = match args.directory {
                Some(directory) => directory,
                None => bail!("--directory is required in backup mode"),
            };
            let roots: Vec<String> = directory.split(',').map(str::to_owned).collect();
            runtime.block_on(run_backup(store, roots))?;
        }
        "interactive" => run_shell(runtime.handle().clone(), store, args.chown)?,
        other => bail!("mode '{}' is not supported", other),
    }
    Ok(())
}
