//! Domain models for the legacy source and the flat target catalog.

mod handle;
mod resource;
mod source;
mod target;

pub use handle::{make_handle, slugify};
pub use resource::ResourceKind;
pub use source::{
    AttributeDefinition, BackendType, FlattenedAttribute, OptionAxis, ProductType,
    RawAttributeValue, SourceAddress, SourceCategory, SourceCustomer, SourceProduct, StockInfo,
    TypedValue,
};
pub use target::{
    NewAddress, NewCategory, NewCustomer, NewProduct, NewVariant, OptionDef, PriceDef,
    ProductImagesUpdate, ProductStatus, TargetAddress, TargetCategory, TargetCustomer,
    TargetProduct, TargetVariant, DEFAULT_OPTION_TITLE, DEFAULT_OPTION_VALUE,
};
