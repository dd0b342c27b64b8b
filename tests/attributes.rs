//! Integration tests for attribute blobs, security declarations, marshalling and user strings.

use dotmeta::{metadata::signatures::NATIVE_TYPE, prelude::*, Result};

fn corlib_type(module: &ModuleDefinitionRc, namespace: &str, name: &str) -> Result<TypeReferenceRc> {
    let corlib = module.corlib_reference()?;
    Ok(TypeReference::new(
        module,
        namespace,
        name,
        TypeReferenceScope::Assembly(corlib),
    ))
}

fn reread(module: &ModuleDefinitionRc) -> Result<ModuleDefinitionRc> {
    ModuleDefinition::read(module.write()?, ReaderParameters::default())
}

#[test]
fn test_named_arguments() -> Result<()> {
    let module = ModuleDefinition::create("Attributes.dll", ModuleKind::Dll);
    let obsolete = corlib_type(&module, "System", "ObsoleteAttribute")?;
    let constructor = MethodReference::new(
        &module,
        ".ctor",
        TypeSignature::reference(&obsolete, false),
        MethodSignature {
            has_this: true,
            ..MethodSignature::new(TypeSignature::Void, vec![TypeSignature::String])
        },
    );

    let class = TypeDefinition::new("Sample", "Old", TypeAttributes::PUBLIC, None);
    module.add_type(class.clone())?;
    let value = CustomAttributeValue {
        fixed_arguments: vec![CustomAttributeArgument::new(
            TypeSignature::String,
            CustomAttributeElement::String(Some("use New".into())),
        )],
        named_arguments: vec![CustomAttributeNamedArgument {
            name: "DiagnosticId".into(),
            is_field: false,
            argument: CustomAttributeArgument::new(
                TypeSignature::String,
                CustomAttributeElement::String(None),
            ),
        }],
    };
    class.add_custom_attribute(CustomAttribute::new(
        MethodHandle::Reference(constructor),
        value.clone(),
    ))?;

    let copy = reread(&module)?;
    let old = copy.get_type("Sample.Old")?.expect("Sample.Old");
    let attributes = old.custom_attributes()?;
    assert_eq!(attributes.len(), 1);
    assert!(attributes[0].blob().is_some());
    assert!(!attributes[0].is_decoded());
    assert_eq!(attributes[0].value()?, value);
    assert!(attributes[0].is_decoded());
    Ok(())
}

#[test]
fn test_security_declaration() -> Result<()> {
    let module = ModuleDefinition::create_assembly(
        AssemblyNameReference::new("Secure", AssemblyVersion::new(1, 0, 0, 0)),
        "Secure.dll",
        ModuleKind::Dll,
    );
    let permission = corlib_type(
        &module,
        "System.Security.Permissions",
        "SecurityPermissionAttribute",
    )?;

    let class = TypeDefinition::new("Sample", "Guarded", TypeAttributes::PUBLIC, None);
    module.add_type(class.clone())?;
    class.add_security_declaration(SecurityDeclaration::new(
        SecurityAction::Demand,
        vec![SecurityAttribute {
            attribute_type: TypeSignature::reference(&permission, false),
            named_arguments: vec![CustomAttributeNamedArgument {
                name: "UnmanagedCode".into(),
                is_field: false,
                argument: CustomAttributeArgument::new(
                    TypeSignature::Boolean,
                    CustomAttributeElement::Boolean(true),
                ),
            }],
        }],
    ))?;

    let copy = reread(&module)?;
    let guarded = copy.get_type("Sample.Guarded")?.expect("Sample.Guarded");
    let declarations = guarded.security_declarations()?;
    assert_eq!(declarations.len(), 1);
    assert_eq!(declarations[0].action, SecurityAction::Demand);

    let attributes = declarations[0].attributes()?;
    assert_eq!(attributes.len(), 1);
    assert_eq!(
        attributes[0].attribute_type.full_name(),
        "System.Security.Permissions.SecurityPermissionAttribute"
    );
    assert_eq!(attributes[0].named_arguments[0].name, "UnmanagedCode");
    assert_eq!(
        attributes[0].named_arguments[0].argument.value,
        CustomAttributeElement::Boolean(true)
    );
    assert!(attributes[0].permission_set_xml().is_none());
    Ok(())
}

#[test]
fn test_field_marshalling() -> Result<()> {
    let module = ModuleDefinition::create("Interop.dll", ModuleKind::Dll);
    let class = TypeDefinition::new("Sample", "Native", TypeAttributes::PUBLIC, None);
    module.add_type(class.clone())?;

    let name = FieldDefinition::new("name", FieldAttributes::PUBLIC, TypeSignature::String);
    class.add_field(name.clone())?;
    name.set_marshal_info(Some(MarshalInfo::Native(NATIVE_TYPE::LPWSTR)))?;
    let plain = FieldDefinition::new("plain", FieldAttributes::PUBLIC, TypeSignature::I4);
    class.add_field(plain)?;

    let image = module.write()?;
    assert_eq!(image.row_count(TableId::FieldMarshal), 1);

    let copy = ModuleDefinition::read(image, ReaderParameters::default())?;
    let native = copy.get_type("Sample.Native")?.expect("Sample.Native");
    let fields = native.fields()?;
    assert_eq!(
        fields[0].marshal_info()?,
        Some(MarshalInfo::Native(NATIVE_TYPE::LPWSTR))
    );
    assert_eq!(fields[1].marshal_info()?, None);
    Ok(())
}

#[test]
fn test_user_string_lookup() -> Result<()> {
    let module = ModuleDefinition::create("Strings.dll", ModuleKind::Dll);
    let mut builder = MetadataBuilder::new(&module)?;
    let hello = builder.user_string_token("Hello")?;
    let world = builder.user_string_token("Wörld")?;
    assert_eq!(builder.user_string_token("Hello")?, hello);
    assert_ne!(hello, world);

    let copy = ModuleDefinition::read(builder.build()?, ReaderParameters::default())?;
    match copy.lookup_token(world)? {
        Some(MetadataEntity::UserString(value)) => assert_eq!(value, "Wörld"),
        other => panic!("unexpected entity {other:?}"),
    }

    // past the end of the heap
    let missing = Token::new(hello.value() + 0x1000);
    assert!(copy.lookup_token(missing)?.is_none());
    Ok(())
}

#[test]
fn test_lookup_of_missing_rows() -> Result<()> {
    let module = ModuleDefinition::create("Empty.dll", ModuleKind::Dll);
    let copy = reread(&module)?;

    assert!(matches!(
        copy.lookup_token(Token::new(0x0100_0001))?,
        None
    ));
    assert!(matches!(
        copy.lookup_token(Token::new(0x0200_0001))?,
        Some(MetadataEntity::Type(_))
    ));
    assert!(copy.lookup_token(Token::new(0x0200_0002))?.is_none());
    assert!(matches!(
        copy.lookup_token(Token::new(0x0000_0001))?,
        Some(MetadataEntity::Module(_))
    ));
    Ok(())
}
