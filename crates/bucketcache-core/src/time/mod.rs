//! Timezone-aware time handling: parsing, UTC/local conversion, and the
//! bucket-boundary algebra that underlies every named and custom bucket rule.

pub mod algebra;
pub mod parse;
pub mod tz;
