//! Resolve the [Site] describing a document.

use crate::{
    retry::{self, Profile},
    Directory, Error, Site,
};
use commonware_runtime::Clock;
use rand::Rng;
use tracing::{info, warn};

/// Looks up the [Site] of a document, retrying according to `profile`.
///
/// Returns [Error::SiteUnavailable] once the profile is exhausted.
pub async fn resolve<E: Clock + Rng, D: Directory>(
    context: &mut E,
    directory: &D,
    profile: &Profile,
) -> Result<Site, Error> {
    let site = retry::retry(context, profile, |_| {
        let mut directory = directory.clone();
        async move { directory.site().await }
    })
    .await
    .map_err(|err| {
        warn!(?err, "unable to resolve site");
        Error::SiteUnavailable
    })?;
    match &site {
        Site::Tree(descriptor) => info!(
            root = ?descriptor.root,
            depth = descriptor.depth,
            total_size = descriptor.total_size,
            "resolved tree site"
        ),
        Site::Flat { count } => info!(count, "resolved flat site"),
    }
    Ok(site)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::Remote;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Runner};
    use std::time::Duration;

    const PROFILE: Profile = Profile {
        max_attempts: 3,
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(500),
        jitter: Duration::ZERO,
    };

    #[test_traced]
    fn test_resolve_tree() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let remote = Remote::new();
            let descriptor = remote.publish(&["a", "b", "c"], 2);

            let site = resolve(&mut context, &remote, &PROFILE).await.unwrap();
            assert_eq!(site, Site::Tree(descriptor));
            assert_eq!(descriptor.total_size, 3);
        });
    }

    #[test_traced]
    fn test_resolve_transient_failure() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let remote = Remote::new();
            remote.publish_flat(vec![remote.leaf("x")]);
            remote.fail_site(2);

            let site = resolve(&mut context, &remote, &PROFILE).await.unwrap();
            assert_eq!(site, Site::Flat { count: 1 });
            assert_eq!(remote.site_reads(), 3);
        });
    }

    #[test_traced]
    fn test_resolve_unavailable() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let remote = Remote::new();
            remote.publish(&["a"], 2);
            remote.fail_site(PROFILE.max_attempts);

            let result = resolve(&mut context, &remote, &PROFILE).await;
            assert_eq!(result, Err(Error::SiteUnavailable));
            assert_eq!(remote.site_reads(), PROFILE.max_attempts);
        });
    }

    #[test_traced]
    fn test_resolve_no_site() {
        let executor = deterministic::Runner::default();
        executor.start(|mut context| async move {
            let remote = Remote::new();
            let result = resolve(&mut context, &remote, &PROFILE).await;
            assert_eq!(result, Err(Error::SiteUnavailable));
        });
    }
}
