use darling::FromField;
use syn::{Ident, Type};

#[derive(FromField)]
#[darling(attributes(ssz))]
pub struct SszField {
    pub ident: Option<Ident>,
    pub ty: Type,

    // Skipped fields hold caches and other data that is not part of the consensus object.
    #[darling(default)]
    pub skip: bool,
}
