pub mod rapid;
pub mod voucher;

pub use rapid::{RapidLookup, RapidOutcome, RapidStore};
pub use voucher::{VoucherCatalogueCache, VoucherPipeline, VoucherStore};
