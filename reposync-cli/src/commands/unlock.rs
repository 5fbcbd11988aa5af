//! Unlock command - inspect or clear a repository's sync lock

use clap::Args;
use reposync_core::lock::{unlock, SyncLock, UnlockAction};

use super::report::holder_line;
use super::target::TargetArgs;

/// Show the sync lock holder, or remove a lock whose holder has exited
#[derive(Args, Debug)]
pub struct UnlockArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Remove the lock file even though its holder may still be running
    #[arg(short, long)]
    pub force: bool,
}

impl UnlockArgs {
    /// Execute the unlock command
    pub fn execute(&self, verbose: bool) -> anyhow::Result<()> {
        let (_, handle) = self.target.resolve(self.target.overrides(), verbose)?;
        let lock_path = SyncLock::lock_path(&handle);

        match unlock(&handle, self.force)? {
            UnlockAction::NoLock => {
                println!("No sync lock held for {}", handle.root().display());
            }
            UnlockAction::RemovedStale(holder) => {
                println!("Sync lock: {}", lock_path.display());
                println!("{}", holder_line(&holder));
                println!("That process is gone; lock removed.");
            }
            UnlockAction::RemovedForced(holder) => {
                println!("Sync lock: {}", lock_path.display());
                if let Some(holder) = holder {
                    println!("{}", holder_line(&holder));
                }
                println!("Lock removed.");
            }
            UnlockAction::Refused(Some(holder)) => {
                println!("Sync lock: {}", lock_path.display());
                println!("{}", holder_line(&holder));
                println!();
                println!("That process is still running. Use --force to remove the lock anyway.");
            }
            UnlockAction::Refused(None) => {
                println!("Sync lock: {} (unreadable)", lock_path.display());
                println!();
                println!("Use --force to remove it once no sync is running.");
            }
        }
        Ok(())
    }
}
