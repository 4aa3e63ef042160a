//! Logging macros.
//!
//! Forwards to `log` (the default backend for this `std`-targeted crate) or
//! `defmt` when the `defmt` feature is enabled, and compiles away to nothing
//! when neither is.

#![allow(unused)]

macro_rules! trace {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            log::trace!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            defmt::trace!($s $(, $x)*);
        }
    };
}

macro_rules! debug {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            log::debug!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            defmt::debug!($s $(, $x)*);
        }
    };
}

macro_rules! info {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            log::info!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            defmt::info!($s $(, $x)*);
        }
    };
}

macro_rules! warn {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            log::warn!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            defmt::warn!($s $(, $x)*);
        }
    };
}

macro_rules! error {
    ($s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "log")]
            log::error!($s $(, $x)*);
            #[cfg(feature = "defmt")]
            defmt::error!($s $(, $x)*);
        }
    };
}

pub(crate) use debug;
pub(crate) use error;
pub(crate) use info;
pub(crate) use trace;
pub(crate) use warn;
