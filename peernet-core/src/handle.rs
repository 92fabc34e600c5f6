//! Typed handles for native resources. Zero is the invalid sentinel for every kind.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            /// The sentinel the native layer uses for "no such resource".
            pub const INVALID: $name = $name(0);

            /// Wrap a raw value returned by the native layer.
            pub const fn from_raw(raw: u32) -> Self {
                $name(raw)
            }

            pub const fn raw(self) -> u32 {
                self.0
            }

            pub const fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

native_handle!(
    /// Handle of a single peer-to-peer connection.
    ConnectionHandle,
    "conn"
);

native_handle!(
    /// Handle of a listen socket bound to a virtual port.
    ListenSocketHandle,
    "listen"
);

native_handle!(
    /// Handle of a poll group; connections in a group are received from together.
    PollGroupHandle,
    "pollgroup"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_invalid_for_every_kind() {
        assert!(!ConnectionHandle::INVALID.is_valid());
        assert!(!ListenSocketHandle::INVALID.is_valid());
        assert!(!PollGroupHandle::INVALID.is_valid());
        assert_eq!(ConnectionHandle::default(), ConnectionHandle::from_raw(0));
    }

    #[test]
    fn nonzero_is_valid() {
        let conn = ConnectionHandle::from_raw(7);
        assert!(conn.is_valid());
        assert_eq!(conn.raw(), 7);
        assert_eq!(conn.to_string(), "conn#7");
        assert_eq!(ListenSocketHandle::from_raw(3).to_string(), "listen#3");
    }
}
