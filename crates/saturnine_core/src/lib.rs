pub mod host;
pub mod vdp;

pub use vdp::Vdp;

/// Maximum horizontal output resolution (Hi-Res Graphic B).
pub const MAX_RES_H: usize = 704;
/// Maximum vertical output resolution (PAL 256 lines, double-density interlaced).
pub const MAX_RES_V: usize = 512;
/// Output framebuffer size in pixels, pitch = horizontal resolution.
pub const FRAMEBUFFER_SIZE: usize = MAX_RES_H * MAX_RES_V;

/// Allocates a `Box<[T; N]>` directly on the heap without blowing the stack.
#[macro_export]
macro_rules! box_array {
    ($val:expr; $len:expr) => {{
        let data = vec![$val; $len].into_boxed_slice();
        match ::std::convert::TryInto::<::std::boxed::Box<[_; $len]>>::try_into(data) {
            Ok(arr) => arr,
            Err(_) => unreachable!(),
        }
    }};
}

#[macro_export]
macro_rules! vdp1_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "vdp1-logging")]
        log::trace!($($arg)*);
    }
}

#[macro_export]
macro_rules! vdp2_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "vdp2-logging")]
        log::trace!($($arg)*);
    }
}
