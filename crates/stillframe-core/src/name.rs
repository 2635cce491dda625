//! Image naming rules shared by every storage-touching job.
//!
//! Managed images live in two disjoint collections addressed by a logical
//! prefix; temporary entries additionally embed their expiry as a
//! `YYYYMMDDTHHMMSSZ__` filename prefix.

use crate::clock::parse_utc_timestamp;

/// Longest accepted image name, prefix and suffix included.
pub const NAME_MAX: usize = 96;
/// Room for a leading `/` plus the `.tmp` sibling suffix used by atomic writes.
pub const PATH_MAX: usize = NAME_MAX + 8;

pub const IMAGE_SUFFIX: &str = ".g4";
const EXPIRY_SEPARATOR: &str = "__";

pub type ImageName = heapless::String<NAME_MAX>;
pub type ImagePath = heapless::String<PATH_MAX>;

/// One of the two rotation groups a managed image can belong to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Collection {
    Permanent,
    Temporary,
}

impl Collection {
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Permanent => "queue-permanent/",
            Self::Temporary => "queue-temporary/",
        }
    }

    pub const fn other(self) -> Self {
        match self {
            Self::Permanent => Self::Temporary,
            Self::Temporary => Self::Permanent,
        }
    }

    /// Collection a prefixed name belongs to, if any.
    pub fn of(name: &str) -> Option<Self> {
        if name.starts_with(Self::Permanent.prefix()) {
            Some(Self::Permanent)
        } else if name.starts_with(Self::Temporary.prefix()) {
            Some(Self::Temporary)
        } else {
            None
        }
    }
}

/// Validate a managed image name before any storage access.
///
/// Accepted: non-empty, at most [`NAME_MAX`] bytes, `.g4` suffix, no
/// traversal sequences, and either no separator at all or exactly one whose
/// prefix names a known collection.
pub fn is_valid_image_name(name: &str) -> bool {
    if name.is_empty() || name.len() > NAME_MAX {
        return false;
    }
    if name.contains("..") || name.contains('\\') {
        return false;
    }
    if !name.ends_with(IMAGE_SUFFIX) || name.len() == IMAGE_SUFFIX.len() {
        return false;
    }

    match name.matches('/').count() {
        0 => true,
        1 => match Collection::of(name) {
            Some(collection) => name.len() > collection.prefix().len() + IMAGE_SUFFIX.len(),
            None => false,
        },
        _ => false,
    }
}

/// Absolute storage path for a managed name (`/` + name).
pub fn storage_path(name: &str) -> ImagePath {
    let mut path = ImagePath::new();
    let _ = path.push('/');
    let _ = path.push_str(name);
    path
}

/// Expiry epoch embedded in a temporary name, if present and well-formed.
///
/// Shape: `queue-temporary/<YYYYMMDDTHHMMSSZ>__<stem>.g4`.
pub fn temporary_expiry(name: &str) -> Option<u64> {
    if Collection::of(name) != Some(Collection::Temporary) {
        return None;
    }
    let rest = &name[Collection::Temporary.prefix().len()..];
    let sep = rest.find(EXPIRY_SEPARATOR)?;
    parse_utc_timestamp(&rest[..sep])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_prefixed_names_accepted() {
        assert!(is_valid_image_name("sunset.g4"));
        assert!(is_valid_image_name("queue-permanent/sunset.g4"));
        assert!(is_valid_image_name(
            "queue-temporary/20260901T000000Z__party.g4"
        ));
    }

    #[test]
    fn invalid_names_rejected() {
        assert!(!is_valid_image_name(""));
        assert!(!is_valid_image_name("sunset.bmp"));
        assert!(!is_valid_image_name(".g4"));
        assert!(!is_valid_image_name("../sunset.g4"));
        assert!(!is_valid_image_name("queue-permanent/..\\x.g4"));
        assert!(!is_valid_image_name("/sunset.g4"));
        assert!(!is_valid_image_name("albums/sunset.g4"));
        assert!(!is_valid_image_name("queue-permanent/a/b.g4"));
        assert!(!is_valid_image_name("queue-permanent/.g4"));

        let mut long = alloc::string::String::from("queue-permanent/");
        while long.len() <= NAME_MAX {
            long.push('x');
        }
        long.push_str(".g4");
        assert!(!is_valid_image_name(&long));
    }

    #[test]
    fn collection_resolution() {
        assert_eq!(
            Collection::of("queue-permanent/a.g4"),
            Some(Collection::Permanent)
        );
        assert_eq!(
            Collection::of("queue-temporary/a.g4"),
            Some(Collection::Temporary)
        );
        assert_eq!(Collection::of("a.g4"), None);
        assert_eq!(Collection::Permanent.other(), Collection::Temporary);
    }

    #[test]
    fn expiry_extraction() {
        assert_eq!(
            temporary_expiry("queue-temporary/20210101T000000Z__x.g4"),
            Some(crate::clock::VALID_EPOCH_MIN)
        );
        // Permanent names never carry an expiry.
        assert_eq!(temporary_expiry("queue-permanent/20210101T000000Z__x.g4"), None);
        assert_eq!(temporary_expiry("queue-temporary/notatimestamp__x.g4"), None);
        assert_eq!(temporary_expiry("queue-temporary/x.g4"), None);
    }

    #[test]
    fn storage_path_prepends_root() {
        assert_eq!(storage_path("queue-permanent/a.g4").as_str(), "/queue-permanent/a.g4");
    }
}
