//! Hidden `clusterplug complete` command used by shell completion scripts.

use anyhow::Result;
use tracing::debug;

use clusterplug::config::Config;
use clusterplug::store::ClusterStore;

use super::open_store;

/// Print the names of clusters starting with the word being completed.
///
/// `words` holds the positional arguments already typed followed by the
/// partial word. Only the first positional is a cluster name, so nothing is
/// offered once one has been given. Store errors yield no candidates.
pub(crate) async fn cmd_complete_clusters(config: &Config, namespace: &str, words: &[String]) -> Result<()> {
    let prefix = match words {
        [] => "",
        [partial] => partial.as_str(),
        _ => return Ok(()),
    };

    let clusters = match open_store(config).list(namespace).await {
        Ok(clusters) => clusters,
        Err(e) => {
            debug!(error = %e, "Cluster completion unavailable");
            return Ok(());
        }
    };

    for name in matching(clusters.iter().map(|c| c.metadata.name.as_str()), prefix) {
        println!("{}", name);
    }
    Ok(())
}

fn matching<'a>(names: impl Iterator<Item = &'a str>, prefix: &str) -> Vec<&'a str> {
    names.filter(|n| n.starts_with(prefix)).collect()
}
