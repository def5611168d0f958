use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use mime_guess::Mime;

/// Changes this recent produce a weak entity tag.
const WEAK_WINDOW: Duration = Duration::from_secs(1);

/// Metadata of the resource being served, resolved once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescriptor {
    name: String,
    length: u64,
    last_modified: SystemTime,
}

impl ContentDescriptor {
    /// `last_modified` is truncated to whole seconds, the resolution of HTTP dates.
    pub fn new(name: impl Into<String>, length: u64, last_modified: SystemTime) -> Self {
        ContentDescriptor {
            name: name.into(),
            length,
            last_modified: truncate_to_seconds(last_modified),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total size in bytes.
    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn last_modified(&self) -> SystemTime {
        self.last_modified
    }

    /// Entity tag of the current representation as seen at `now`.
    ///
    /// The tag is derived from the modification time. It is weak while the
    /// resource changed less than a second before `now`, strong afterwards.
    pub fn entity_tag(&self, now: SystemTime) -> EntityTag {
        let weak = match now.duration_since(self.last_modified) {
            Ok(age) => age <= WEAK_WINDOW,
            Err(_) => true,
        };
        EntityTag {
            opaque: format!("{:X}", unix_seconds(self.last_modified)),
            weak,
        }
    }

    /// MIME type guessed from the resource name.
    pub fn content_type(&self) -> Mime {
        mime_guess::from_path(&self.name).first_or_octet_stream()
    }
}

/// An HTTP entity tag, rendered as `"opaque"` or `W/"opaque"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityTag {
    opaque: String,
    weak: bool,
}

impl EntityTag {
    pub fn is_weak(&self) -> bool {
        self.weak
    }

    pub fn opaque(&self) -> &str {
        &self.opaque
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weak {
            write!(f, "W/\"{}\"", self.opaque)
        } else {
            write!(f, "\"{}\"", self.opaque)
        }
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn truncate_to_seconds(time: SystemTime) -> SystemTime {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => UNIX_EPOCH + Duration::from_secs(d.as_secs()),
        // pre-epoch times round towards the epoch
        Err(e) => UNIX_EPOCH - Duration::from_secs(e.duration().as_secs()),
    }
}
