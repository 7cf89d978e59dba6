use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

/// A build-target descriptor such as `x64-windows`, identified by its
/// canonical (lowercase) name. Cloning is cheap; the name is shared.
///
/// Two triplets fill typed roles during planning: the *target* triplet a
/// package is built for, and the *host* triplet tools run on. A spec is
/// "native" when the two are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Triplet {
    name: Arc<str>,
}

impl Triplet {
    pub fn from_canonical_name(name: impl AsRef<str>) -> Triplet {
        Triplet {
            name: Arc::from(name.as_ref().to_ascii_lowercase().as_str()),
        }
    }

    pub fn canonical_name(&self) -> &str {
        &self.name
    }
}

impl Display for Triplet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl Serialize for Triplet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for Triplet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Triplet::from_canonical_name(String::deserialize(
            deserializer,
        )?))
    }
}
