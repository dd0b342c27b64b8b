use crate::metadata::tables::{CodedIndexType, TableId};

/// The storage class of one column in a table row.
///
/// The width of every class except the fixed integers depends on the module: heap index
/// widths come from the heap size flags, table and coded indices from row counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Fixed 2-byte value
    U16,
    /// Fixed 4-byte value
    U32,
    /// Index into `#Strings`
    String,
    /// Index into `#GUID`
    Guid,
    /// Index into `#Blob`
    Blob,
    /// Row id of a single table
    Table(TableId),
    /// Coded index into one of several tables
    Coded(CodedIndexType),
}

use Column::{Blob, Coded, Guid, Table, U16, U32};
use CodedIndexType as Ci;

/// Column layout of `table`, in physical order (ECMA-335 II.22).
///
/// The reader and the builder both derive row sizes and column offsets from this list.
#[must_use]
#[rustfmt::skip]
pub fn columns(table: TableId) -> &'static [Column] {
    match table {
        TableId::Module => &[
            U16,                /* generation */
            Column::String,     /* name */
            Guid,               /* mvid */
            Guid,               /* enc_id */
            Guid,               /* enc_base_id */
        ],
        TableId::TypeRef => &[
            Coded(Ci::ResolutionScope),
            Column::String,     /* name */
            Column::String,     /* namespace */
        ],
        TableId::TypeDef => &[
            U32,                /* flags */
            Column::String,     /* name */
            Column::String,     /* namespace */
            Coded(Ci::TypeDefOrRef), /* extends */
            Table(TableId::Field),   /* field_list */
            Table(TableId::MethodDef), /* method_list */
        ],
        TableId::FieldPtr => &[Table(TableId::Field)],
        TableId::Field => &[U16, Column::String, Blob],
        TableId::MethodPtr => &[Table(TableId::MethodDef)],
        TableId::MethodDef => &[
            U32,                /* rva */
            U16,                /* impl_flags */
            U16,                /* flags */
            Column::String,     /* name */
            Blob,               /* signature */
            Table(TableId::Param), /* param_list */
        ],
        TableId::ParamPtr => &[Table(TableId::Param)],
        TableId::Param => &[U16 /* flags */, U16 /* sequence */, Column::String],
        TableId::InterfaceImpl => &[Table(TableId::TypeDef), Coded(Ci::TypeDefOrRef)],
        TableId::MemberRef => &[Coded(Ci::MemberRefParent), Column::String, Blob],
        TableId::Constant => &[
            U16,                /* element type + padding byte */
            Coded(Ci::HasConstant),
            Blob,
        ],
        TableId::CustomAttribute => &[
            Coded(Ci::HasCustomAttribute),
            Coded(Ci::CustomAttributeType),
            Blob,
        ],
        TableId::FieldMarshal => &[Coded(Ci::HasFieldMarshal), Blob],
        TableId::DeclSecurity => &[U16 /* action */, Coded(Ci::HasDeclSecurity), Blob],
        TableId::ClassLayout => &[U16 /* packing */, U32 /* class_size */, Table(TableId::TypeDef)],
        TableId::FieldLayout => &[U32 /* offset */, Table(TableId::Field)],
        TableId::StandAloneSig => &[Blob],
        TableId::EventMap => &[Table(TableId::TypeDef), Table(TableId::Event)],
        TableId::EventPtr => &[Table(TableId::Event)],
        TableId::Event => &[U16, Column::String, Coded(Ci::TypeDefOrRef)],
        TableId::PropertyMap => &[Table(TableId::TypeDef), Table(TableId::Property)],
        TableId::PropertyPtr => &[Table(TableId::Property)],
        TableId::Property => &[U16, Column::String, Blob],
        TableId::MethodSemantics => &[
            U16,                /* semantics */
            Table(TableId::MethodDef),
            Coded(Ci::HasSemantics),
        ],
        TableId::MethodImpl => &[
            Table(TableId::TypeDef),
            Coded(Ci::MethodDefOrRef), /* body */
            Coded(Ci::MethodDefOrRef), /* declaration */
        ],
        TableId::ModuleRef => &[Column::String],
        TableId::TypeSpec => &[Blob],
        TableId::ImplMap => &[
            U16,                /* mapping flags */
            Coded(Ci::MemberForwarded),
            Column::String,     /* import name */
            Table(TableId::ModuleRef),
        ],
        TableId::FieldRVA => &[U32, Table(TableId::Field)],
        TableId::EncLog => &[U32, U32],
        TableId::EncMap => &[U32],
        TableId::Assembly => &[
            U32,                /* hash_alg_id */
            U16, U16, U16, U16, /* version */
            U32,                /* flags */
            Blob,               /* public_key */
            Column::String,     /* name */
            Column::String,     /* culture */
        ],
        TableId::AssemblyProcessor => &[U32],
        TableId::AssemblyOS => &[U32, U32, U32],
        TableId::AssemblyRef => &[
            U16, U16, U16, U16, /* version */
            U32,                /* flags */
            Blob,               /* public_key_or_token */
            Column::String,     /* name */
            Column::String,     /* culture */
            Blob,               /* hash_value */
        ],
        TableId::AssemblyRefProcessor => &[U32, Table(TableId::AssemblyRef)],
        TableId::AssemblyRefOS => &[U32, U32, U32, Table(TableId::AssemblyRef)],
        TableId::File => &[U32 /* flags */, Column::String, Blob /* hash */],
        TableId::ExportedType => &[
            U32,                /* flags */
            U32,                /* type_def_id hint */
            Column::String,     /* name */
            Column::String,     /* namespace */
            Coded(Ci::Implementation),
        ],
        TableId::ManifestResource => &[
            U32,                /* offset */
            U32,                /* flags */
            Column::String,
            Coded(Ci::Implementation),
        ],
        TableId::NestedClass => &[Table(TableId::TypeDef), Table(TableId::TypeDef)],
        TableId::GenericParam => &[
            U16,                /* number */
            U16,                /* flags */
            Coded(Ci::TypeOrMethodDef),
            Column::String,
        ],
        TableId::MethodSpec => &[Coded(Ci::MethodDefOrRef), Blob],
        TableId::GenericParamConstraint => &[
            Table(TableId::GenericParam),
            Coded(Ci::TypeDefOrRef),
        ],
    }
}

/// The column a sorted table is ordered by, for the tables the builder sorts on output.
///
/// `GenericParam` is ordered by owner and then number and is handled by the builder itself.
#[must_use]
pub fn sort_key(table: TableId) -> Option<usize> {
    match table {
        TableId::CustomAttribute
        | TableId::FieldMarshal
        | TableId::InterfaceImpl
        | TableId::MethodImpl
        | TableId::NestedClass
        | TableId::GenericParamConstraint => Some(0),
        TableId::Constant
        | TableId::DeclSecurity
        | TableId::FieldLayout
        | TableId::FieldRVA
        | TableId::ImplMap => Some(1),
        TableId::ClassLayout | TableId::MethodSemantics => Some(2),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_table_has_columns() {
        for table in TableId::iter() {
            assert!(!columns(table).is_empty(), "{table:?}");
        }
    }

    #[test]
    fn sort_keys_point_at_index_columns() {
        for table in TableId::iter() {
            if let Some(key) = sort_key(table) {
                let column = columns(table)[key];
                assert!(
                    matches!(column, Column::Table(_) | Column::Coded(_)),
                    "{table:?} sorts by {column:?}"
                );
            }
        }
    }
}
