pub mod context;
pub mod enums;
pub mod inference;
pub mod referral;
pub mod report;
pub mod review;

pub use context::*;
pub use enums::*;
pub use inference::*;
pub use referral::*;
pub use report::*;
pub use review::*;
pub use test::*;
