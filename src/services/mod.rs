pub mod annotate;
pub mod detector;
pub mod glyphs;
pub mod intake;
pub mod queue;
pub mod status;
pub mod storage;
pub mod worker;
