use crate::{EventStoreError, RecordedEvent, Result, StreamHeader, Timestamp, Version};

/// Which part of a stream a load returns.
///
/// Bounds past the newest batch are clamped to the whole stream; bounds
/// before the first batch select nothing and the load fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBound {
    /// Every event.
    Latest,
    /// Every event, provided the stream is at exactly this version.
    /// `Version::LATEST` skips the check.
    ExpectedVersion(Version),
    /// Events of batches with version `<=` the bound.
    UpToVersion(Version),
    /// Events of batches with timestamp `<=` the bound.
    UpToTimestamp(Timestamp),
}

impl LoadBound {
    /// Whether `event` falls inside the bound.
    pub fn admits(&self, event: &RecordedEvent) -> bool {
        match self {
            LoadBound::Latest | LoadBound::ExpectedVersion(_) => true,
            LoadBound::UpToVersion(version) => event.version <= *version,
            LoadBound::UpToTimestamp(timestamp) => event.timestamp <= *timestamp,
        }
    }

    /// Checks the header against an expected-version bound.
    pub(crate) fn check_header(&self, header: &StreamHeader) -> Result<()> {
        if let LoadBound::ExpectedVersion(expected) = *self
            && !expected.is_latest()
            && header.version != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id: header.stream_id,
                expected,
                actual: header.version,
            });
        }
        Ok(())
    }

    /// Upper version limit for SQL filtering.
    pub(crate) fn max_version(&self) -> Version {
        match self {
            LoadBound::UpToVersion(version) => *version,
            _ => Version::LATEST,
        }
    }

    /// Upper timestamp limit for SQL filtering.
    pub(crate) fn max_timestamp(&self) -> Timestamp {
        match self {
            LoadBound::UpToTimestamp(timestamp) => *timestamp,
            _ => Timestamp::from_millis(i64::MAX),
        }
    }
}

impl std::fmt::Display for LoadBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadBound::Latest => f.write_str("latest"),
            LoadBound::ExpectedVersion(v) => write!(f, "at expected version {v}"),
            LoadBound::UpToVersion(v) => write!(f, "up to version {v}"),
            LoadBound::UpToTimestamp(t) => write!(f, "up to {t}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Identity;

    fn event(version: i64, millis: i64) -> RecordedEvent {
        RecordedEvent {
            sequence: 0,
            version: Version::new(version),
            timestamp: Timestamp::from_millis(millis),
            payload: vec![],
        }
    }

    #[test]
    fn up_to_version_is_inclusive() {
        let bound = LoadBound::UpToVersion(Version::new(2));
        assert!(bound.admits(&event(1, 0)));
        assert!(bound.admits(&event(2, 0)));
        assert!(!bound.admits(&event(3, 0)));
    }

    #[test]
    fn up_to_timestamp_is_inclusive() {
        let bound = LoadBound::UpToTimestamp(Timestamp::from_millis(100));
        assert!(bound.admits(&event(5, 100)));
        assert!(!bound.admits(&event(5, 101)));
    }

    #[test]
    fn expected_version_checks_header() {
        let header = StreamHeader {
            stream_id: Identity::new(),
            aggregate_type: "Order".to_string(),
            version: Version::new(3),
            timestamp: Timestamp::from_millis(0),
            next_sequence: 4,
        };

        assert!(LoadBound::ExpectedVersion(Version::new(3)).check_header(&header).is_ok());
        assert!(LoadBound::ExpectedVersion(Version::LATEST).check_header(&header).is_ok());

        let err = LoadBound::ExpectedVersion(Version::new(2))
            .check_header(&header)
            .unwrap_err();
        assert!(matches!(
            err,
            EventStoreError::ConcurrencyConflict { expected, actual, .. }
                if expected == Version::new(2) && actual == Version::new(3)
        ));
    }
}
