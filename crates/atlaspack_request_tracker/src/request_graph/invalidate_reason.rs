use bitflags::bitflags;

bitflags! {
  /// Why a request node was marked invalid. Reasons accumulate until the request reruns.
  #[derive(Debug, Eq, PartialEq, Copy, Clone, Hash)]
  pub struct InvalidateReason: u16 {
    const INITIAL_BUILD = 1 << 0;
    const FILE_CREATE = 1 << 1;
    const FILE_UPDATE = 1 << 2;
    const FILE_DELETE = 1 << 3;
    const ENV_CHANGE = 1 << 4;
    const OPTION_CHANGE = 1 << 5;
    const STARTUP = 1 << 6;
    const ERROR = 1 << 7;
    const BUILD = 1 << 8;
  }
}

impl InvalidateReason {
  pub const VALID: InvalidateReason = InvalidateReason::empty();
}

impl Default for InvalidateReason {
  fn default() -> Self {
    InvalidateReason::VALID
  }
}

impl serde::Serialize for InvalidateReason {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    self.bits().serialize(serializer)
  }
}

impl<'de> serde::Deserialize<'de> for InvalidateReason {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    let bits: u16 = serde::Deserialize::deserialize(deserializer)?;
    Ok(InvalidateReason::from_bits_truncate(bits))
  }
}
