//! Integration tests for importing members of one module into another and writing them.

use dotmeta::{prelude::*, Result};

/// `Library.dll` with `Library.MarkerAttribute::.ctor(string)`, `Library.Util::Echo<T>(T, List<T>)`
/// and the generic `Library.Bag`1` with `Add(!0)`.
struct Library {
    module: ModuleDefinitionRc,
    marker_ctor: MethodDefinitionRc,
    echo: MethodDefinitionRc,
    bag: TypeDefinitionRc,
    bag_add: MethodDefinitionRc,
}

fn library() -> Result<Library> {
    let module = ModuleDefinition::create_assembly(
        AssemblyNameReference::new("Library", AssemblyVersion::new(1, 0, 0, 0)),
        "Library.dll",
        ModuleKind::Dll,
    );

    let marker = TypeDefinition::new("Library", "MarkerAttribute", TypeAttributes::PUBLIC, None);
    module.add_type(marker.clone())?;
    let marker_ctor = MethodDefinition::new(
        ".ctor",
        MethodAttributes::PUBLIC | MethodAttributes::SPECIAL_NAME | MethodAttributes::RTSPECIAL_NAME,
        TypeSignature::Void,
    );
    marker_ctor.add_parameter(ParameterDefinition::new("text", 0, TypeSignature::String));
    marker.add_method(marker_ctor.clone())?;

    let util = TypeDefinition::new("Library", "Util", TypeAttributes::PUBLIC, None);
    module.add_type(util.clone())?;
    let echo = MethodDefinition::new(
        "Echo",
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        TypeSignature::method_parameter(0),
    );
    util.add_method(echo.clone())?;
    echo.add_generic_parameter("T")?;
    echo.add_parameter(ParameterDefinition::new("value", 0, TypeSignature::method_parameter(0)));
    let corlib = module.corlib_reference()?;
    let list = TypeReference::new(
        &module,
        "System.Collections.Generic",
        "List`1",
        TypeReferenceScope::Assembly(corlib),
    );
    echo.add_parameter(ParameterDefinition::new(
        "items",
        0,
        TypeSignature::generic_instance(
            TypeSignature::reference(&list, false),
            vec![TypeSignature::method_parameter(0)],
        ),
    ));

    let bag = TypeDefinition::new("Library", "Bag`1", TypeAttributes::PUBLIC, None);
    module.add_type(bag.clone())?;
    bag.add_generic_parameter("T")?;
    let bag_add = MethodDefinition::new("Add", MethodAttributes::PUBLIC, TypeSignature::Void);
    bag_add.add_parameter(ParameterDefinition::new("item", 0, TypeSignature::type_parameter(0)));
    bag.add_method(bag_add.clone())?;

    Ok(Library {
        module,
        marker_ctor,
        echo,
        bag,
        bag_add,
    })
}

fn application() -> ModuleDefinitionRc {
    ModuleDefinition::create_assembly(
        AssemblyNameReference::new("Application", AssemblyVersion::new(1, 0, 0, 0)),
        "Application.exe",
        ModuleKind::Console,
    )
}

/// Test that foreign definitions can not be written without importing them first.
#[test]
fn test_foreign_member_is_rejected() -> Result<()> {
    let library = library()?;
    let app = application();
    let class = TypeDefinition::new("App", "Tagged", TypeAttributes::PUBLIC, None);
    app.add_type(class.clone())?;
    class.add_custom_attribute(CustomAttribute::new(
        MethodHandle::definition(&library.marker_ctor),
        CustomAttributeValue::default(),
    ))?;

    let error = app.write().err().expect("foreign constructor");
    assert!(matches!(error, dotmeta::Error::ForeignMember(_)));
    assert!(error.is_misuse());
    drop(library);
    Ok(())
}

/// Test an imported attribute constructor end to end.
#[test]
fn test_imported_attribute_constructor() -> Result<()> {
    let library = library()?;
    let app = application();
    let constructor = app.import_method(&MethodHandle::definition(&library.marker_ctor))?;

    let class = TypeDefinition::new("App", "Tagged", TypeAttributes::PUBLIC, None);
    app.add_type(class.clone())?;
    class.add_custom_attribute(CustomAttribute::new(
        constructor,
        CustomAttributeValue {
            fixed_arguments: vec![CustomAttributeArgument::new(
                TypeSignature::String,
                CustomAttributeElement::String(Some("hello".into())),
            )],
            named_arguments: Vec::new(),
        },
    ))?;

    let copy = ModuleDefinition::read(app.write()?, ReaderParameters::default())?;
    let references = copy.assembly_references()?;
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].name, "Library");

    let tagged = copy.get_type("App.Tagged")?.expect("App.Tagged");
    let attributes = tagged.custom_attributes()?;
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes[0].constructor.full_name(), "Library.MarkerAttribute::.ctor");
    assert_eq!(
        attributes[0].attribute_type().map(|t| t.full_name()),
        Some("Library.MarkerAttribute".to_string())
    );

    let value = attributes[0].value()?;
    assert_eq!(
        value.fixed_arguments[0].value,
        CustomAttributeElement::String(Some("hello".into()))
    );
    Ok(())
}

/// Test a generic method instance built from an imported method.
#[test]
fn test_generic_method_instance() -> Result<()> {
    let library = library()?;
    let app = application();
    let echo = app.import_method(&MethodHandle::definition(&library.echo))?;
    let instance = GenericInstanceMethod::new(&app, echo, vec![TypeSignature::I4]);

    let resolved = instance.resolved_signature()?;
    assert_eq!(resolved.return_type, TypeSignature::I4);
    assert_eq!(resolved.parameters[0], TypeSignature::I4);
    assert_eq!(
        resolved.parameters[1].full_name(),
        "System.Collections.Generic.List`1<System.Int32>"
    );

    let handle = MethodHandle::Instance(instance);
    let mut builder = MetadataBuilder::new(&app)?;
    let token = builder.method_token(&handle)?;
    assert_eq!(token.table_id(), Some(TableId::MethodSpec));
    assert_eq!(builder.method_token(&handle)?, token);

    let image = builder.build()?;
    assert_eq!(image.row_count(TableId::MethodSpec), 1);
    assert_eq!(image.row_count(TableId::MemberRef), 1);

    let copy = ModuleDefinition::read(image, ReaderParameters::default())?;
    match copy.lookup_token(token)? {
        Some(MetadataEntity::MethodSpecification(instance)) => {
            assert_eq!(instance.arguments, vec![TypeSignature::I4]);
            assert_eq!(instance.method.name(), "Echo");
            let resolved = instance.resolved_signature()?;
            assert_eq!(resolved.return_type, TypeSignature::I4);
            assert_eq!(
                resolved.parameters[1].full_name(),
                "System.Collections.Generic.List`1<System.Int32>"
            );
        }
        other => panic!("unexpected entity {other:?}"),
    }
    Ok(())
}

/// Test a member of a generic type instance, referenced through a `TypeSpec` parent.
#[test]
fn test_member_of_generic_instance() -> Result<()> {
    let library = library()?;
    let app = application();

    let bag = app.import_type(&TypeSignature::class(&library.bag))?;
    let bag_of_int = TypeSignature::generic_instance(bag, vec![TypeSignature::I4]);
    let add = app.import_method(&MethodHandle::definition(&library.bag_add))?;
    let signature = add.signature()?;
    assert_eq!(signature.parameters, vec![TypeSignature::type_parameter(0)]);

    let reference = MethodHandle::Reference(MethodReference::new(&app, "Add", bag_of_int, signature));
    let mut builder = MetadataBuilder::new(&app)?;
    let token = builder.method_token(&reference)?;
    let image = builder.build()?;
    assert_eq!(image.row_count(TableId::TypeSpec), 1);

    let copy = ModuleDefinition::read(image, ReaderParameters::default())?;
    let Some(MetadataEntity::MemberReference(MemberReference::Method(add))) =
        copy.lookup_token(token)?
    else {
        panic!("expected a method reference");
    };
    assert_eq!(add.declaring_type.full_name(), "Library.Bag`1<System.Int32>");

    let TypeSignature::GenericInst { arguments, .. } = &add.declaring_type else {
        panic!("expected a generic instance parent");
    };
    let parameter = add.signature.parameters[0].substitute(arguments, &[]);
    assert_eq!(parameter, TypeSignature::I4);
    Ok(())
}

/// Test that importing the same type twice produces one `TypeRef` row.
#[test]
fn test_repeated_imports_share_rows() -> Result<()> {
    let library = library()?;
    let app = application();
    let first = app.import_type(&TypeSignature::class(&library.bag))?;
    let second = app.import_type(&TypeSignature::class(&library.bag))?;

    let mut builder = MetadataBuilder::new(&app)?;
    assert_eq!(builder.type_token(&first)?, builder.type_token(&second)?);
    let image = builder.build()?;
    assert_eq!(image.row_count(TableId::TypeRef), 1);
    assert_eq!(image.row_count(TableId::AssemblyRef), 1);
    drop(library.module);
    Ok(())
}
