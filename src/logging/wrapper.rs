// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `[context] message` logging through the `log` facade.

#[doc(hidden)]
#[macro_export]
macro_rules! __log_in_context {
    ($level:expr, $context:expr, $($arg:tt)+) => {
        log::log!($level, "[{}] {}", $context, format_args!($($arg)+))
    };
}

#[macro_export]
macro_rules! error_fmt {
    ($context:expr, $($arg:tt)+) => { $crate::__log_in_context!(log::Level::Error, $context, $($arg)+) };
}

#[macro_export]
macro_rules! warn_fmt {
    ($context:expr, $($arg:tt)+) => { $crate::__log_in_context!(log::Level::Warn, $context, $($arg)+) };
}

#[macro_export]
macro_rules! info_fmt {
    ($context:expr, $($arg:tt)+) => { $crate::__log_in_context!(log::Level::Info, $context, $($arg)+) };
}

#[macro_export]
macro_rules! debug_fmt {
    ($context:expr, $($arg:tt)+) => { $crate::__log_in_context!(log::Level::Debug, $context, $($arg)+) };
}

#[macro_export]
macro_rules! trace_fmt {
    ($context:expr, $($arg:tt)+) => { $crate::__log_in_context!(log::Level::Trace, $context, $($arg)+) };
}
