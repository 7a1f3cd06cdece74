use crate::{MediaKind, SizeLimits, UploadError, UploadResult};

/// Rejects oversized payloads before anything touches the network
#[derive(Debug, Clone, Default)]
pub struct SizeGuard {
    limits: SizeLimits,
}

impl SizeGuard {
    pub fn new(limits: SizeLimits) -> Self {
        Self { limits }
    }

    /// Resolve the class and ceiling that apply to a request.
    ///
    /// Unknown classes fall back to the most restrictive ceiling.
    pub fn threshold(&self, kind: Option<MediaKind>) -> (MediaKind, u64) {
        match kind {
            Some(kind) => (kind, self.limits.limit_for(kind)),
            None => self.limits.most_restrictive(),
        }
    }

    /// Check a payload size against its class ceiling
    pub fn check(&self, size: u64, kind: Option<MediaKind>) -> UploadResult<()> {
        let (kind, limit) = self.threshold(kind);
        if size > limit {
            return Err(UploadError::SizeExceeded {
                kind,
                actual: size,
                limit,
            });
        }
        Ok(())
    }

    pub fn limits(&self) -> &SizeLimits {
        &self.limits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_within_limit_passes() {
        let guard = SizeGuard::default();
        assert_ok!(guard.check(2 * MB, Some(MediaKind::Image)));
        assert_ok!(guard.check(4 * MB, Some(MediaKind::Image)));
        assert_ok!(guard.check(450 * MB, Some(MediaKind::Archive)));
    }

    #[test]
    fn test_oversized_video_is_rejected() {
        let guard = SizeGuard::default();
        match guard.check(90 * MB, Some(MediaKind::Video)) {
            Err(UploadError::SizeExceeded { kind, actual, limit }) => {
                assert_eq!(kind, MediaKind::Video);
                assert_eq!(actual, 90 * MB);
                assert_eq!(limit, 80 * MB);
            }
            other => panic!("expected SizeExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_kind_uses_most_restrictive() {
        let guard = SizeGuard::default();
        assert_err!(guard.check(5 * MB, None));
        assert_eq!(guard.threshold(None), (MediaKind::Image, 4 * MB));
    }

    #[test]
    fn test_dedicated_paths_have_larger_ceilings() {
        let guard = SizeGuard::default();
        assert_ok!(guard.check(95 * MB, Some(MediaKind::Audio)));
        assert_err!(guard.check(101 * MB, Some(MediaKind::Audio)));
        assert_err!(guard.check(501 * MB, Some(MediaKind::Archive)));
    }
}
