//! Logging interface, contingent on the hidden `__log` feature, or on `defmt-03`
//!
//! Only enable `__log` when debugging, and when you're certain that your
//! logger isn't using USB!
//!
//! Keep the arguments to integers and booleans; both back ends need to
//! format them.

macro_rules! debug {
    ($($args:tt)*) => {
        #[cfg(feature = "__log")]
        ::__log::debug!($($args)*);
        #[cfg(feature = "defmt-03")]
        ::defmt::debug!($($args)*);
    };
}

macro_rules! warn {
    ($($args:tt)*) => {
        #[cfg(feature = "__log")]
        ::__log::warn!($($args)*);
        #[cfg(feature = "defmt-03")]
        ::defmt::warn!($($args)*);
    };
}

macro_rules! trace {
    ($($args:tt)*) => {
        #[cfg(feature = "__log")]
        ::__log::trace!($($args)*);
        #[cfg(feature = "defmt-03")]
        ::defmt::trace!($($args)*);
    };
}
