//! Macro for implementing Display and FromStr for small label enums
//!
//! Several domain enums (cache state, account type) are logged and parsed
//! from configuration using a lowercase label. This macro provides both
//! directions from a single mapping.
//!
//! # Example
//!
//! ```rust
//! use credcache_domain::impl_label_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Phase {
//!     Starting,
//!     Running,
//! }
//!
//! impl_label_conversions!(Phase {
//!     Starting => "starting",
//!     Running => "running",
//! });
//!
//! assert_eq!(Phase::Running.to_string(), "running");
//! ```

/// Implements Display and FromStr traits for label enums
///
/// Labels must be lowercase; parsing is case-insensitive.
#[macro_export]
macro_rules! impl_label_conversions {
    ($enum_name:ident { $($variant:ident => $str:literal),+ $(,)? }) => {
        impl ::std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl ::std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
