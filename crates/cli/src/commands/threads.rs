//! `threadline threads`: list saved threads.

use threadline_bridge::SchedulerHandle;
use threadline_core::checkpoint::CheckpointStore;
use threadline_core::message::Role;
use threadline_session::{DEFAULT_TITLE, generate_title};

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let bridge = SchedulerHandle::start("threadline-bridge")?;

    let checkpoint = config.checkpoint.clone();
    let threads = bridge.submit_blocking(async move {
        let store = threadline_checkpoint::open_store(&checkpoint).await?;
        let mut out = Vec::new();
        for id in store.list_threads().await? {
            let messages = store.load(&id).await?;
            out.push((id, messages));
        }
        Ok::<_, threadline_core::error::CheckpointError>(out)
    })??;
    bridge.shutdown();

    if threads.is_empty() {
        println!("No saved threads.");
        return Ok(());
    }

    let words = config.session.title_max_words;
    for (id, messages) in &threads {
        let title = messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| generate_title(&m.content, words))
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        println!("{id}  {title}  ({} messages)", messages.len());
    }

    Ok(())
}
