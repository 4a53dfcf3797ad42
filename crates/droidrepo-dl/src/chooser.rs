use std::{cmp::Reverse, sync::Arc};

use rand::seq::SliceRandom;
use tracing::info;

use crate::{
    error::{DownloadError, Result},
    mirror::{DownloadRequest, Mirror},
    parameters::MirrorParameterManager,
};

/// Orders the mirrors of a request, best first.
///
/// Implementations only decide the order; the retry loop lives in [`mirror_request`] so every
/// strategy shares the same fallback rules.
pub trait MirrorChooser: Send + Sync {
    fn order_mirrors(&self, request: &DownloadRequest) -> Vec<Mirror>;

    /// Called after `mirror` served a request.
    fn on_success(&self, _mirror: &Mirror) {}

    /// Called after `mirror` failed a request.
    fn on_error(&self, _mirror: &Mirror) {}
}

/// Runs `op` against the mirrors of `request` in the order chosen by `chooser`.
///
/// Retryable errors move on to the next mirror; the error of the last mirror is returned
/// unchanged. Three cases stop immediately: a 403 while credentials were sent, a 404 while a
/// try-first mirror was given (the file is missing, not the mirror broken), and cancellation.
///
/// Onion mirrors are skipped unless a proxy is configured or nothing else is left. IPFS
/// gateways are skipped when the file has no CID.
pub fn mirror_request<C, T, F>(chooser: &C, request: &DownloadRequest, mut op: F) -> Result<T>
where
    C: MirrorChooser + ?Sized,
    F: FnMut(&Mirror, &str) -> Result<T>,
{
    if request.mirrors.is_empty() {
        return Err(DownloadError::NoMirrors);
    }

    let mut ordered = chooser.order_mirrors(request);
    move_to_front(&mut ordered, request.try_first_mirror.as_ref());

    let mirrors = if request.proxy.is_none() {
        let reachable: Vec<Mirror> = ordered
            .iter()
            .filter(|mirror| {
                !mirror.is_onion() || request.try_first_mirror.as_ref() == Some(*mirror)
            })
            .cloned()
            .collect();
        if reachable.is_empty() {
            ordered
        } else {
            reachable
        }
    } else {
        ordered
    };

    if mirrors.is_empty() {
        return Err(DownloadError::NoMirrors);
    }

    let last = mirrors.len() - 1;
    for (index, mirror) in mirrors.iter().enumerate() {
        let is_last = index == last;

        let url = if mirror.is_ipfs_gateway {
            match &request.index_file.ipfs_cid_v1 {
                Some(cid) => mirror.get_url(cid),
                None => {
                    let err = DownloadError::IpfsWithoutCid;
                    log_fallback(&err, is_last);
                    if is_last {
                        return Err(err);
                    }
                    continue;
                }
            }
        } else {
            mirror.get_url(&request.index_file.name)
        };

        match op(mirror, &url) {
            Ok(value) => {
                chooser.on_success(mirror);
                return Ok(value);
            }
            Err(err) => {
                if matches!(err, DownloadError::Interrupted) {
                    return Err(err);
                }
                chooser.on_error(mirror);

                if request.has_credentials() && matches!(err, DownloadError::Forbidden { .. }) {
                    return Err(err);
                }
                if request.try_first_mirror.is_some()
                    && matches!(err, DownloadError::NotFound { .. })
                {
                    return Err(err);
                }

                log_fallback(&err, is_last);
                if is_last || !err.is_retryable() {
                    return Err(err);
                }
            }
        }
    }

    Err(DownloadError::NoMirrors)
}

fn log_fallback(err: &DownloadError, was_last: bool) {
    if was_last {
        info!("Last mirror, rethrowing... ({})", err.info());
    } else {
        info!("Trying other mirror now... ({})", err.info());
    }
}

fn move_to_front(mirrors: &mut [Mirror], first: Option<&Mirror>) {
    if let Some(pos) = first.and_then(|first| mirrors.iter().position(|m| m == first)) {
        mirrors[..=pos].rotate_right(1);
    }
}

/// Shuffles the mirrors on every request.
#[derive(Debug, Default, Clone)]
pub struct RandomMirrorChooser;

impl MirrorChooser for RandomMirrorChooser {
    fn order_mirrors(&self, request: &DownloadRequest) -> Vec<Mirror> {
        let mut mirrors = request.mirrors.clone();
        mirrors.shuffle(&mut rand::thread_rng());
        move_to_front(&mut mirrors, request.try_first_mirror.as_ref());
        mirrors
    }
}

/// Orders mirrors by their recorded success/error history and optionally by location.
pub struct ParameterMirrorChooser {
    manager: Arc<dyn MirrorParameterManager>,
    use_location: bool,
}

impl ParameterMirrorChooser {
    /// History-only ordering.
    pub fn weighted(manager: Arc<dyn MirrorParameterManager>) -> Self {
        Self {
            manager,
            use_location: false,
        }
    }

    /// History ordering grouped by the manager's location preferences.
    pub fn location_aware(manager: Arc<dyn MirrorParameterManager>) -> Self {
        Self {
            manager,
            use_location: true,
        }
    }

    fn score(&self, mirror: &Mirror) -> i64 {
        i64::from(self.manager.get_mirror_success_count(&mirror.base_url))
            - i64::from(self.manager.get_mirror_error_count(&mirror.base_url))
    }
}

impl MirrorChooser for ParameterMirrorChooser {
    fn order_mirrors(&self, request: &DownloadRequest) -> Vec<Mirror> {
        let mut sorted = request.mirrors.clone();
        sorted.sort_by_cached_key(|mirror| Reverse(self.score(mirror)));

        if !self.use_location {
            return sorted;
        }

        let locations = self.manager.current_locations();
        let regional_first = self.manager.prefer_regional_mirrors();
        let worldwide_first = self.manager.prefer_worldwide_mirrors();
        if locations.is_empty() || (!regional_first && !worldwide_first) {
            return sorted;
        }

        let mut regional = Vec::new();
        let mut worldwide = Vec::new();
        let mut unknown = Vec::new();
        for mirror in sorted {
            match mirror.location.as_deref() {
                Some(location) if !location.is_empty() => {
                    if locations.iter().any(|l| l == location) {
                        regional.push(mirror);
                    } else {
                        worldwide.push(mirror);
                    }
                }
                _ => unknown.push(mirror),
            }
        }

        let mut ordered = Vec::with_capacity(regional.len() + worldwide.len() + unknown.len());
        if regional_first {
            ordered.extend(regional);
            ordered.extend(worldwide);
        } else {
            ordered.extend(worldwide);
            ordered.extend(regional);
        }
        ordered.extend(unknown);
        ordered
    }

    fn on_success(&self, mirror: &Mirror) {
        self.manager.increment_mirror_success_count(&mirror.base_url);
    }

    fn on_error(&self, mirror: &Mirror) {
        self.manager.increment_mirror_error_count(&mirror.base_url);
    }
}
