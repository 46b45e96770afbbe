//! Stream State
//!
//! A stream is a time-bounded run of sequence-numbered objects sharing one
//! opening instant. Object keys look like:
//!
//! ```text
//! {prefix}/{YYYYMMDDTHHMMSSZ}/{sequence:08}.gz
//! ```
//!
//! Streams are never closed explicitly. A new one is opened when the current
//! one is older than the configured maximum duration.

use crate::streaming::clock::UnixMillis;
use std::time::Duration;

/// Width of the zero-padded sequence number in object keys
pub const SEQUENCE_WIDTH: usize = 8;

/// Object key suffix
pub const OBJECT_SUFFIX: &str = ".gz";

/// The writer's currently open stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stream {
    /// Instant the stream was opened
    pub id: UnixMillis,
    /// Next unused sequence number
    pub sequence_number: u64,
}

impl Stream {
    /// Fresh stream opened at `now`
    pub fn open(now: UnixMillis) -> Self {
        Stream {
            id: now,
            sequence_number: 0,
        }
    }

    /// Stream after a successful write
    pub fn advanced(self) -> Self {
        Stream {
            id: self.id,
            sequence_number: self.sequence_number + 1,
        }
    }

    /// Key for the object carrying this stream's next sequence number
    pub fn object_key(&self, prefix: &str) -> String {
        object_key(prefix, self.id, self.sequence_number)
    }
}

/// Whether a batch arriving at `now` must open a new stream
pub fn should_rotate(current: Option<&Stream>, now: UnixMillis, max_duration: Duration) -> bool {
    match current {
        None => true,
        Some(stream) => now.saturating_sub(stream.id) >= max_duration,
    }
}

/// Stream to write the next batch into: the current one, or a new one opened at `now`
///
/// Keys only carry whole seconds of the stream id. A stream opened within the
/// same second as the current one would reuse its keys, so it continues the
/// current sequence instead of restarting at 0. Stream ids never move
/// backwards across a rotation.
pub fn select_stream(current: Option<Stream>, now: UnixMillis, max_duration: Duration) -> Stream {
    match current {
        None => Stream::open(now),
        Some(stream) if !should_rotate(Some(&stream), now, max_duration) => stream,
        Some(stream) => {
            let id = now.max(stream.id);
            if same_key_second(id, stream.id) {
                Stream {
                    id,
                    sequence_number: stream.sequence_number,
                }
            } else {
                Stream::open(id)
            }
        }
    }
}

/// Whether two stream ids render to the same key directory
fn same_key_second(a: UnixMillis, b: UnixMillis) -> bool {
    a.as_millis() / 1_000 == b.as_millis() / 1_000
}

/// Build an object key; an empty prefix contributes no leading segment
pub fn object_key(prefix: &str, stream_id: UnixMillis, sequence_number: u64) -> String {
    let prefix = prefix.trim_end_matches('/');
    let name = format!(
        "{}/{:0width$}{}",
        stream_id.to_compact_utc(),
        sequence_number,
        OBJECT_SUFFIX,
        width = SEQUENCE_WIDTH
    );
    if prefix.is_empty() {
        name
    } else {
        format!("{}/{}", prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn test_rotate_without_stream() {
        assert!(should_rotate(None, UnixMillis(0), DAY));
        assert_eq!(select_stream(None, UnixMillis(42), DAY), Stream::open(UnixMillis(42)));
    }

    #[test]
    fn test_rotate_at_boundary() {
        let stream = Stream::open(UnixMillis(1_000));
        let max = Duration::from_millis(500);

        assert!(!should_rotate(Some(&stream), UnixMillis(1_499), max));
        assert!(should_rotate(Some(&stream), UnixMillis(1_500), max));
        assert!(should_rotate(Some(&stream), UnixMillis(9_000), max));
    }

    #[test]
    fn test_zero_duration_always_rotates() {
        let stream = Stream::open(UnixMillis(1_000));
        assert!(should_rotate(Some(&stream), UnixMillis(1_000), Duration::ZERO));
    }

    #[test]
    fn test_rotation_within_same_second_continues_sequence() {
        let stream = Stream {
            id: UnixMillis(1_704_164_645_100),
            sequence_number: 4,
        };
        let next = select_stream(Some(stream), UnixMillis(1_704_164_645_900), Duration::ZERO);
        assert_eq!(next.id, UnixMillis(1_704_164_645_900));
        assert_eq!(next.sequence_number, 4);
        assert_eq!(
            next.object_key("p"),
            "p/20240102T030405Z/00000004.gz"
        );

        let later = select_stream(Some(next), UnixMillis(1_704_164_646_000), Duration::ZERO);
        assert_eq!(later, Stream::open(UnixMillis(1_704_164_646_000)));
    }

    #[test]
    fn test_rotation_never_moves_id_backwards() {
        let stream = Stream {
            id: UnixMillis(5_500),
            sequence_number: 2,
        };
        let next = select_stream(Some(stream), UnixMillis(1_000), Duration::ZERO);
        assert_eq!(next.id, UnixMillis(5_500));
        assert_eq!(next.sequence_number, 2);
    }

    #[test]
    fn test_clock_backwards_keeps_stream() {
        let stream = Stream {
            id: UnixMillis(5_000),
            sequence_number: 3,
        };
        assert_eq!(select_stream(Some(stream), UnixMillis(10), DAY), stream);
    }

    #[test]
    fn test_object_key_layout() {
        // 2024-01-02T03:04:05Z
        let id = UnixMillis(1_704_164_645_000);
        assert_eq!(
            object_key("flows/agent", id, 7),
            "flows/agent/20240102T030405Z/00000007.gz"
        );
        assert_eq!(object_key("flows/", id, 0), "flows/20240102T030405Z/00000000.gz");
        assert_eq!(object_key("", id, 12), "20240102T030405Z/00000012.gz");
    }

    #[test]
    fn test_sequence_widens_past_eight_digits() {
        let key = object_key("p", UnixMillis::EPOCH, 123_456_789);
        assert_eq!(key, "p/19700101T000000Z/123456789.gz");
    }

    #[test]
    fn test_advanced_keeps_id() {
        let stream = Stream::open(UnixMillis(7)).advanced().advanced();
        assert_eq!(stream.id, UnixMillis(7));
        assert_eq!(stream.sequence_number, 2);
    }
}
