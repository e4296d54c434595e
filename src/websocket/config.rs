use std::sync::Arc;

use websocket::frame::Opcode;

/// Kind of data messages produced by `Sender::write`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Text,
    Binary,
}

impl Kind {
    pub(crate) fn opcode(&self) -> Opcode {
        match *self {
            Kind::Text => Opcode::Text,
            Kind::Binary => Opcode::Binary,
        }
    }
}

/// The permessage-deflate configuration block
///
/// Disabled by default on both roles. Window bits must stay in 8..=15,
/// which `Config::permessage_deflate` asserts.
#[derive(Debug, Clone)]
pub struct DeflateConfig {
    /// Offer/accept compression when playing the server role
    pub server_enable: bool,
    /// Offer/accept compression when playing the client role
    pub client_enable: bool,
    pub server_max_window_bits: u8,
    pub client_max_window_bits: u8,
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
    /// Deflate level for outgoing messages (0-9)
    pub compression_level: u32,
}

impl Default for DeflateConfig {
    fn default() -> DeflateConfig {
        DeflateConfig {
            server_enable: false,
            client_enable: false,
            server_max_window_bits: 15,
            client_max_window_bits: 15,
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            compression_level: 6,
        }
    }
}

/// Websocket connection options
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) auto_fragment: bool,
    pub(crate) message_kind: Kind,
    pub(crate) read_buffer_size: usize,
    pub(crate) read_message_max: usize,
    pub(crate) write_buffer_size: usize,
    pub(crate) deflate: DeflateConfig,
}

impl Config {
    /// Create a config with defaults
    pub fn new() -> Config {
        Config {
            auto_fragment: true,
            message_kind: Kind::Text,
            read_buffer_size: 4096,
            read_message_max: 16 << 20,
            write_buffer_size: 4096,
            deflate: DeflateConfig::default(),
        }
    }

    /// Split large outgoing messages into bounded frames
    ///
    /// Default is enabled. When disabled every `write` produces a single
    /// frame regardless of size.
    pub fn auto_fragment(&mut self, enabled: bool) -> &mut Self {
        self.auto_fragment = enabled;
        self
    }

    /// Kind of messages produced by `Sender::write` (text by default)
    ///
    /// Can also be switched per connection with `Sender::set_binary`.
    pub fn message_kind(&mut self, kind: Kind) -> &mut Self {
        self.message_kind = kind;
        self
    }

    /// Read-ahead bound and inflater output granularity
    ///
    /// Default is 4096.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn read_buffer_size(&mut self, size: usize) -> &mut Self {
        assert!(size > 0);
        self.read_buffer_size = size;
        self
    }

    /// Maximum accepted message size
    ///
    /// Applies to the message as delivered, i.e. after decompression.
    /// If some message exceeds this, the read fails with `TooLong` and
    /// the connection should be dropped. Default is 16 MiB.
    pub fn read_message_max(&mut self, size: usize) -> &mut Self {
        self.read_message_max = size;
        self
    }

    /// Target size of outgoing frames when auto-fragmenting
    ///
    /// Default is 4096.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn write_buffer_size(&mut self, size: usize) -> &mut Self {
        assert!(size > 0);
        self.write_buffer_size = size;
        self
    }

    /// Configure permessage-deflate
    ///
    /// # Panics
    ///
    /// Panics when window bits are outside 8..=15 or the compression
    /// level is above 9.
    pub fn permessage_deflate(&mut self, deflate: DeflateConfig)
        -> &mut Self
    {
        assert!(deflate.server_max_window_bits >= 8 &&
                deflate.server_max_window_bits <= 15);
        assert!(deflate.client_max_window_bits >= 8 &&
                deflate.client_max_window_bits <= 15);
        assert!(deflate.compression_level <= 9);
        self.deflate = deflate;
        self
    }

    /// Create a Arc'd config clone to pass to the constructor
    ///
    /// This is just a convenience method.
    pub fn done(&mut self) -> Arc<Config> {
        Arc::new(self.clone())
    }
}

#[cfg(test)]
mod test {
    use super::{Config, DeflateConfig, Kind};

    #[test]
    fn defaults() {
        let cfg = Config::new().done();
        assert!(cfg.auto_fragment);
        assert_eq!(cfg.message_kind, Kind::Text);
        assert_eq!(cfg.read_message_max, 16 << 20);
        assert!(!cfg.deflate.server_enable);
    }

    #[test]
    #[should_panic]
    fn bad_window_bits() {
        let mut deflate = DeflateConfig::default();
        deflate.server_max_window_bits = 16;
        Config::new().permessage_deflate(deflate);
    }
}
