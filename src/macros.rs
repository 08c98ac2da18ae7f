macro_rules! net_trace {
    ($($arg:tt)*) => {
        log::trace!($($arg)*);
    };
}

macro_rules! net_debug {
    ($($arg:tt)*) => {
        log::debug!($($arg)*);
    };
}
