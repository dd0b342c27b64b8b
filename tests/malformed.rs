//! Integration tests feeding corrupted metadata to the reader.
//!
//! The images start out as valid output of the builder; single columns or heap bytes are
//! then overwritten. Corruption in a lazily decoded part must surface as an error from the
//! accessor that decodes it, never as a panic, and must leave the rest of the module usable.

use dotmeta::{prelude::*, Error, Result};

/// A module with `Sample.Broken : System.Object` holding one `int32` field.
fn valid_image() -> Result<MetadataImage> {
    let module = ModuleDefinition::create("Broken.dll", ModuleKind::Dll);
    let corlib = module.corlib_reference()?;
    let object = TypeReference::new(&module, "System", "Object", TypeReferenceScope::Assembly(corlib));

    let class = TypeDefinition::new(
        "Sample",
        "Broken",
        TypeAttributes::PUBLIC,
        Some(TypeSignature::reference(&object, false)),
    );
    module.add_type(class.clone())?;
    class.add_field(FieldDefinition::new("value", FieldAttributes::PUBLIC, TypeSignature::I4))?;
    module.write()
}

/// Rebuild `image` after `patch` modified its streams.
fn patched<F>(image: MetadataImage, patch: F) -> Result<MetadataImage>
where
    F: FnOnce(&mut MetadataStreams, &MetadataImage),
{
    let mut streams = image.streams().clone();
    patch(&mut streams, &image);
    MetadataImage::new(streams, image.info().clone())
}

fn write_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

/// Offset of the `Extends` column of `TypeDef` row 2, with two byte string indices.
fn extends_offset(image: &MetadataImage) -> usize {
    image.row_offset(TableId::TypeDef, 2).unwrap() + 4 + 2 + 2
}

#[test]
fn test_invalid_coded_index_tag() -> Result<()> {
    let image = patched(valid_image()?, |streams, image| {
        // tag 3 is unused in TypeDefOrRef
        write_u16(&mut streams.tables, extends_offset(image), (1 << 2) | 3);
    })?;

    let module = ModuleDefinition::read(image, ReaderParameters::default())?;
    let class = module.get_type("Sample.Broken")?.expect("type rows are intact");

    let error = class.base_type().unwrap_err();
    assert!(matches!(
        error,
        Error::UnsupportedCodedIndex {
            kind: CodedIndexType::TypeDefOrRef,
            value: 7
        }
    ));
    assert!(error.is_malformed_input());

    // the rest of the type is still readable
    assert_eq!(class.fields()?[0].name, "value");
    Ok(())
}

#[test]
fn test_coded_index_past_the_table_end() -> Result<()> {
    let image = patched(valid_image()?, |streams, image| {
        // TypeRef row 99
        write_u16(&mut streams.tables, extends_offset(image), (99 << 2) | 1);
    })?;

    let module = ModuleDefinition::read(image, ReaderParameters::default())?;
    let class = module.get_type("Sample.Broken")?.expect("type rows are intact");
    assert!(class.base_type().unwrap_err().is_malformed_input());
    Ok(())
}

#[test]
fn test_corrupt_field_signature() -> Result<()> {
    let image = patched(valid_image()?, |streams, image| {
        let row = image.row_offset(TableId::Field, 1).unwrap();
        let blob = read_u16(&streams.tables, row + 2 + 2) as usize;
        // length byte, then the FIELD header
        assert_eq!(streams.blob[blob + 1], 0x06);
        streams.blob[blob + 1] = 0x07;
    })?;

    let module = ModuleDefinition::read(image, ReaderParameters::default())?;
    let class = module.get_type("Sample.Broken")?.expect("type rows are intact");
    assert!(class.fields().unwrap_err().is_malformed_input());

    // decoding everything up front reports the same corruption at load
    let image = patched(valid_image()?, |streams, image| {
        let row = image.row_offset(TableId::Field, 1).unwrap();
        let blob = read_u16(&streams.tables, row + 2 + 2) as usize;
        streams.blob[blob + 1] = 0x07;
    })?;
    let parameters = ReaderParameters::new().with_reading_mode(ReadingMode::Immediate);
    assert!(ModuleDefinition::read(image, parameters).is_err());
    Ok(())
}

#[test]
fn test_truncated_tables_stream() -> Result<()> {
    let image = valid_image()?;
    let mut streams = image.streams().clone();
    let rows_end = streams.tables.len() - 8;
    streams.tables.truncate(rows_end);

    let error = MetadataImage::new(streams, ImageInfo::default()).err().expect("truncated");
    assert!(error.is_malformed_input());
    Ok(())
}

#[test]
fn test_heap_without_leading_zero() -> Result<()> {
    let image = valid_image()?;
    let mut streams = image.streams().clone();
    streams.strings[0] = b'x';

    let error = MetadataImage::new(streams, ImageInfo::default()).err().expect("bad heap");
    assert!(error.is_malformed_input());
    Ok(())
}

#[test]
fn test_string_index_out_of_range() -> Result<()> {
    let image = patched(valid_image()?, |streams, image| {
        let row = image.row_offset(TableId::TypeDef, 2).unwrap();
        write_u16(&mut streams.tables, row + 4, 0xFFF0);
    })?;

    let module = ModuleDefinition::read(image, ReaderParameters::default())?;
    assert!(module.types().unwrap_err().is_malformed_input());
    Ok(())
}

#[test]
fn test_failed_constant_decode_is_repeatable() -> Result<()> {
    let module = ModuleDefinition::create("Constants.dll", ModuleKind::Dll);
    let class = TypeDefinition::new("Sample", "Limits", TypeAttributes::PUBLIC, None);
    module.add_type(class.clone())?;
    let field = FieldDefinition::new(
        "Max",
        FieldAttributes::PUBLIC | FieldAttributes::STATIC | FieldAttributes::LITERAL,
        TypeSignature::I4,
    );
    class.add_field(field.clone())?;
    field.set_constant(Some(ConstantValue::I4(10)))?;

    let image = patched(module.write()?, |streams, image| {
        // Type (padded byte), Parent, Value
        let row = image.row_offset(TableId::Constant, 1).unwrap();
        write_u16(&mut streams.tables, row + 2 + 2, 0xFFF0);
    })?;

    let copy = ModuleDefinition::read(image, ReaderParameters::default())?;
    let limits = copy.get_type("Sample.Limits")?.expect("type rows are intact");
    let max = limits.fields()?[0].clone();

    assert!(max.constant().unwrap_err().is_malformed_input());
    // the row is not lost after the first failure
    assert!(max.constant().unwrap_err().is_malformed_input());
    Ok(())
}

#[test]
fn test_override_with_member_reference_body() -> Result<()> {
    let module = ModuleDefinition::create("Overrides.dll", ModuleKind::Dll);
    let corlib = module.corlib_reference()?;
    let object = TypeReference::new(&module, "System", "Object", TypeReferenceScope::Assembly(corlib));

    let class = TypeDefinition::new(
        "Sample",
        "Finalizable",
        TypeAttributes::PUBLIC,
        Some(TypeSignature::reference(&object, false)),
    );
    module.add_type(class.clone())?;
    let finalize = MethodDefinition::new(
        "Finalize",
        MethodAttributes::FAMILY | MethodAttributes::VIRTUAL,
        TypeSignature::Void,
    );
    class.add_method(finalize.clone())?;
    finalize.add_override(MethodHandle::Reference(MethodReference::new(
        &module,
        "Finalize",
        TypeSignature::reference(&object, false),
        MethodSignature {
            has_this: true,
            ..MethodSignature::new(TypeSignature::Void, Vec::new())
        },
    )))?;

    let image = module.write()?;
    assert_eq!(image.row_count(TableId::MethodImpl), 1);
    let image = patched(image, |streams, image| {
        // Class, MethodBody, MethodDeclaration; MemberRef row 1 as the body
        let row = image.row_offset(TableId::MethodImpl, 1).unwrap();
        assert_eq!(read_u16(&streams.tables, row + 2), 1 << 1);
        write_u16(&mut streams.tables, row + 2, (1 << 1) | 1);
    })?;

    let copy = ModuleDefinition::read(image, ReaderParameters::default())?;
    let finalizable = copy.get_type("Sample.Finalizable")?.expect("type rows are intact");
    let finalize = finalizable.methods()?[0].clone();

    let error = finalize.overrides().unwrap_err();
    assert!(matches!(error, Error::NotSupported(_)));
    assert!(error.is_malformed_input());
    assert!(finalize.overrides().is_err());

    // the method itself is still readable
    assert_eq!(finalize.name, "Finalize");
    Ok(())
}
