//! Host devices receive commands and produce physical effects.
//!
//! The mapper only knows the [`CommandDispatcher`] trait; the concrete sender
//! is picked by whoever builds the receiver.

pub mod udpclient;
pub use self::udpclient::UdpClient;

use crate::fixture::Rgb;

/// Where a command goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target<'a> {
    /// Fixture id.
    pub id: &'a str,
    /// IP address or hostname of the fixture.
    pub address: &'a str,
}

/// Fire-and-forget commands to fixtures. Implementations must not block on
/// acknowledgements; failures are theirs to log.
pub trait CommandDispatcher: Send + Sync {
    /// Set the onboard indicator LED.
    fn set_indicator_color(&self, target: Target<'_>, color: Rgb);
    /// Set the whole accessory strip to one color.
    fn set_strip_color(&self, target: Target<'_>, color: Rgb);
    /// Set every LED of an array fixture.
    fn set_led_array(&self, target: Target<'_>, leds: &[Rgb]);
}
