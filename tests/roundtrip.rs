//! Integration tests writing modules built in memory and reading them back.
//!
//! Each test builds a module graph through the public API, serializes it with
//! `ModuleDefinition::write`, reads the streams back and checks that the entities survived.

use dotmeta::{metadata::typesystem::InterfaceImplementation, prelude::*, Result};

fn sample_assembly() -> ModuleDefinitionRc {
    ModuleDefinition::create_assembly(
        AssemblyNameReference::new("Sample", AssemblyVersion::new(1, 2, 3, 4)),
        "Sample.dll",
        ModuleKind::Dll,
    )
}

fn object_reference(module: &ModuleDefinitionRc) -> Result<TypeSignature> {
    let corlib = module.corlib_reference()?;
    let object = TypeReference::new(module, "System", "Object", TypeReferenceScope::Assembly(corlib));
    Ok(TypeSignature::reference(&object, false))
}

fn reread(module: &ModuleDefinitionRc) -> Result<ModuleDefinitionRc> {
    ModuleDefinition::read(module.write()?, ReaderParameters::default())
}

/// Test that an empty module keeps its name, MVID and `<Module>` type.
#[test]
fn test_empty_module() -> Result<()> {
    let module = ModuleDefinition::create("Empty.dll", ModuleKind::Dll);
    let copy = reread(&module)?;

    assert_eq!(copy.name, "Empty.dll");
    assert_eq!(copy.mvid, module.mvid);
    assert!(copy.assembly()?.is_none());

    let types = copy.types()?;
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].name, "<Module>");
    Ok(())
}

/// Test that the assembly row and its references survive.
#[test]
fn test_assembly_identity() -> Result<()> {
    let module = sample_assembly();
    module.corlib_reference()?;

    let copy = reread(&module)?;
    let assembly = copy.assembly()?.expect("assembly row");
    assert_eq!(assembly.name.name, "Sample");
    assert_eq!(assembly.name.version, AssemblyVersion::new(1, 2, 3, 4));

    let references = copy.assembly_references()?;
    assert_eq!(references.len(), 1);
    assert_eq!(references[0].name, "mscorlib");
    assert_eq!(
        references[0].public_key_or_token,
        vec![0xb7, 0x7a, 0x5c, 0x56, 0x19, 0x34, 0xe0, 0x89]
    );
    Ok(())
}

/// Test a class with a base type, fields, methods and parameters.
#[test]
fn test_class_with_members() -> Result<()> {
    let module = sample_assembly();
    let base = object_reference(&module)?;
    let class = TypeDefinition::new("Sample", "Person", TypeAttributes::PUBLIC, Some(base));
    module.add_type(class.clone())?;

    class.add_field(FieldDefinition::new("name", FieldAttributes::PRIVATE, TypeSignature::String))?;
    class.add_field(FieldDefinition::new("age", FieldAttributes::PRIVATE, TypeSignature::I4))?;

    let rename = MethodDefinition::new("Rename", MethodAttributes::PUBLIC, TypeSignature::Void);
    rename.add_parameter(ParameterDefinition::new("value", 0, TypeSignature::String));
    class.add_method(rename)?;
    class.add_method(MethodDefinition::new(
        "Create",
        MethodAttributes::PUBLIC | MethodAttributes::STATIC,
        TypeSignature::class(&class),
    ))?;

    let copy = reread(&module)?;
    let person = copy.get_type("Sample.Person")?.expect("Sample.Person");
    assert_eq!(person.flags(), TypeAttributes::PUBLIC);
    assert_eq!(
        person.base_type()?.map(|base| base.full_name()),
        Some("System.Object".to_string())
    );

    let fields = person.fields()?;
    let names: Vec<_> = fields.iter().map(|field| field.name.as_str()).collect();
    assert_eq!(names, ["name", "age"]);
    assert_eq!(fields[1].field_type, TypeSignature::I4);

    let methods = person.methods()?;
    assert_eq!(methods.len(), 2);
    assert_eq!(methods[0].name, "Rename");
    assert!(methods[0].has_this());
    let parameters = methods[0].parameters();
    assert_eq!(parameters.len(), 1);
    assert_eq!(parameters[0].name, "value");
    assert_eq!(parameters[0].parameter_type(), TypeSignature::String);

    assert!(methods[1].is_static());
    assert_eq!(methods[1].return_type().full_name(), "Sample.Person");
    Ok(())
}

/// Test that nested types keep their enclosing type and that field and method lists of
/// later types start where the earlier ones ended.
#[test]
fn test_nested_types_and_member_ranges() -> Result<()> {
    let module = sample_assembly();
    let outer = TypeDefinition::new("Sample", "Outer", TypeAttributes::PUBLIC, None);
    module.add_type(outer.clone())?;
    let inner = TypeDefinition::new("", "Inner", TypeAttributes::NESTED_PUBLIC, None);
    outer.add_nested_type(inner.clone())?;
    let last = TypeDefinition::new("Sample", "Last", TypeAttributes::PUBLIC, None);
    module.add_type(last.clone())?;

    outer.add_field(FieldDefinition::new("a", FieldAttributes::PUBLIC, TypeSignature::I4))?;
    inner.add_field(FieldDefinition::new("b", FieldAttributes::PUBLIC, TypeSignature::I8))?;
    last.add_field(FieldDefinition::new("c", FieldAttributes::PUBLIC, TypeSignature::U1))?;
    last.add_field(FieldDefinition::new("d", FieldAttributes::PUBLIC, TypeSignature::U2))?;

    let copy = reread(&module)?;
    let inner = copy.get_type("Sample.Outer/Inner")?.expect("nested type");
    assert_eq!(inner.full_name(), "Sample.Outer/Inner");
    assert_eq!(inner.declaring_type().map(|outer| outer.name.clone()), Some("Outer".into()));
    assert_eq!(inner.fields()?[0].name, "b");

    let outer = copy.get_type("Sample.Outer")?.expect("outer type");
    assert_eq!(outer.fields()?.len(), 1);
    assert_eq!(outer.nested_types()?.len(), 1);

    let last = copy.get_type("Sample.Last")?.expect("last type");
    let names: Vec<_> = last.fields()?.iter().map(|field| field.name.clone()).collect();
    assert_eq!(names, ["c", "d"]);
    Ok(())
}

/// Test constants, explicit layout, field RVAs and class layout.
#[test]
fn test_field_details() -> Result<()> {
    let module = sample_assembly();
    let class = TypeDefinition::new("Sample", "Data", TypeAttributes::PUBLIC, None);
    module.add_type(class.clone())?;
    class.set_layout(Some(ClassLayout {
        packing_size: 4,
        class_size: 16,
    }))?;

    let answer = FieldDefinition::new(
        "Answer",
        FieldAttributes::PUBLIC | FieldAttributes::STATIC | FieldAttributes::LITERAL,
        TypeSignature::I4,
    );
    answer.set_constant(Some(ConstantValue::I4(42)))?;
    class.add_field(answer)?;

    let greeting = FieldDefinition::new(
        "Greeting",
        FieldAttributes::PUBLIC | FieldAttributes::STATIC | FieldAttributes::LITERAL,
        TypeSignature::String,
    );
    greeting.set_constant(Some(ConstantValue::String("hi".into())))?;
    class.add_field(greeting)?;

    let placed = FieldDefinition::new("placed", FieldAttributes::PUBLIC, TypeSignature::I8);
    placed.set_offset(Some(8))?;
    class.add_field(placed)?;

    let blob = FieldDefinition::new(
        "blob",
        FieldAttributes::STATIC | FieldAttributes::HAS_FIELD_RVA,
        TypeSignature::I4,
    );
    blob.set_rva(Some(0x2050))?;
    class.add_field(blob)?;

    let copy = reread(&module)?;
    let data = copy.get_type("Sample.Data")?.expect("Sample.Data");
    assert_eq!(
        data.layout()?,
        Some(ClassLayout {
            packing_size: 4,
            class_size: 16
        })
    );

    let fields = data.fields()?;
    assert_eq!(fields[0].constant()?, Some(ConstantValue::I4(42)));
    assert_eq!(fields[1].constant()?, Some(ConstantValue::String("hi".into())));
    assert_eq!(fields[2].offset()?, Some(8));
    assert_eq!(fields[2].constant()?, None);
    assert_eq!(fields[3].rva()?, Some(0x2050));
    Ok(())
}

/// Test properties and events with their accessors.
#[test]
fn test_properties_and_events() -> Result<()> {
    let module = sample_assembly();
    let class = TypeDefinition::new("Sample", "Counter", TypeAttributes::PUBLIC, None);
    module.add_type(class.clone())?;

    let getter = MethodDefinition::new(
        "get_Count",
        MethodAttributes::PUBLIC | MethodAttributes::SPECIAL_NAME,
        TypeSignature::I4,
    );
    class.add_method(getter.clone())?;
    let property = PropertyDefinition::new("Count", 0, TypeSignature::I4);
    property.set_has_this(true);
    property.set_getter(Some(getter))?;
    class.add_property(property)?;

    let add = MethodDefinition::new(
        "add_Changed",
        MethodAttributes::PUBLIC | MethodAttributes::SPECIAL_NAME,
        TypeSignature::Void,
    );
    class.add_method(add.clone())?;
    let event = EventDefinition::new("Changed", 0, object_reference(&module)?);
    event.set_add_method(Some(add))?;
    class.add_event(event)?;

    let copy = reread(&module)?;
    let counter = copy.get_type("Sample.Counter")?.expect("Sample.Counter");

    let properties = counter.properties()?;
    assert_eq!(properties.len(), 1);
    assert_eq!(properties[0].name, "Count");
    assert_eq!(properties[0].property_type(), TypeSignature::I4);
    let getter = properties[0].getter()?.expect("getter");
    assert_eq!(getter.name, "get_Count");
    assert_eq!(getter.semantics()?, MethodSemanticsAttributes::GETTER);
    assert!(properties[0].setter()?.is_none());

    let events = counter.events()?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type().full_name(), "System.Object");
    assert_eq!(events[0].add_method()?.map(|m| m.name.clone()), Some("add_Changed".into()));
    Ok(())
}

/// Test generic parameters, constraints and interface implementations.
#[test]
fn test_generics_and_interfaces() -> Result<()> {
    let module = sample_assembly();
    let corlib = module.corlib_reference()?;
    let disposable = TypeReference::new(
        &module,
        "System",
        "IDisposable",
        TypeReferenceScope::Assembly(corlib),
    );

    let class = TypeDefinition::new("Sample", "Box`1", TypeAttributes::PUBLIC, None);
    module.add_type(class.clone())?;
    let parameter = class.add_generic_parameter("T")?;
    parameter.add_constraint(TypeSignature::reference(&disposable, false))?;
    class.add_interface(InterfaceImplementation::new(TypeSignature::reference(
        &disposable,
        false,
    )))?;

    class.add_field(FieldDefinition::new(
        "value",
        FieldAttributes::PRIVATE,
        TypeSignature::type_parameter(0),
    ))?;

    let method = MethodDefinition::new("Map", MethodAttributes::PUBLIC, TypeSignature::Void);
    class.add_method(method.clone())?;
    method.add_generic_parameter("TResult")?;
    method.set_return_type(TypeSignature::method_parameter(0));

    let copy = reread(&module)?;
    let class = copy.get_type("Sample.Box`1")?.expect("Sample.Box`1");

    let parameters = class.generic_parameters()?;
    assert_eq!(parameters.len(), 1);
    assert_eq!(parameters[0].name, "T");
    let constraints = parameters[0].constraints()?;
    assert_eq!(constraints.len(), 1);
    assert_eq!(constraints[0].constraint_type.full_name(), "System.IDisposable");

    let interfaces = class.interfaces()?;
    assert_eq!(interfaces.len(), 1);
    assert_eq!(interfaces[0].interface.full_name(), "System.IDisposable");

    match &class.fields()?[0].field_type {
        TypeSignature::GenericParam(param) => {
            assert_eq!(param.position, 0);
            assert_eq!(param.name(), "T");
        }
        other => panic!("unexpected field type {other}"),
    }

    let method = &class.methods()?[0];
    assert_eq!(method.generic_parameters()?[0].name, "TResult");
    assert_eq!(method.signature().generic_parameter_count, 1);
    Ok(())
}

/// Test platform invoke and module references.
#[test]
fn test_pinvoke() -> Result<()> {
    let module = sample_assembly();
    let class = TypeDefinition::new("Sample", "Native", TypeAttributes::PUBLIC, None);
    module.add_type(class.clone())?;

    let method = MethodDefinition::new(
        "MessageBeep",
        MethodAttributes::PUBLIC | MethodAttributes::STATIC | MethodAttributes::PINVOKE_IMPL,
        TypeSignature::Boolean,
    );
    method.add_parameter(ParameterDefinition::new("type", 0, TypeSignature::U4));
    class.add_method(method.clone())?;
    method.set_pinvoke(Some(PInvokeInfo {
        flags: PInvokeAttributes::SUPPORTS_LAST_ERROR | PInvokeAttributes::CALL_CONV_WINAPI,
        entry_point: "MessageBeep".into(),
        module: module.find_or_add_module_reference("user32.dll")?,
    }))?;

    let copy = reread(&module)?;
    assert_eq!(copy.module_references()?.len(), 1);

    let method = copy.get_type("Sample.Native")?.expect("Sample.Native").methods()?[0].clone();
    let pinvoke = method.pinvoke()?.expect("pinvoke info");
    assert_eq!(pinvoke.entry_point, "MessageBeep");
    assert_eq!(pinvoke.module.name, "user32.dll");
    assert!(pinvoke.flags.contains(PInvokeAttributes::SUPPORTS_LAST_ERROR));
    Ok(())
}

/// Test exported types: forwarders to other assemblies and types of other modules.
#[test]
fn test_exported_types() -> Result<()> {
    let module = sample_assembly();
    let target = module.add_assembly_reference(AssemblyNameReference::new(
        "Target",
        AssemblyVersion::new(2, 0, 0, 0),
    ))?;
    module.add_exported_type(ExportedType::forwarder("Sample", "Moved", target))?;
    module.add_exported_type(ExportedType::new(
        "Sample",
        "Elsewhere",
        TypeAttributes::PUBLIC,
        ExportedTypeScope::Module(ModuleReference::new("Extra.netmodule")),
    ))?;

    let copy = reread(&module)?;
    let exported = copy.exported_types()?;
    assert_eq!(exported.len(), 2);

    assert_eq!(exported[0].full_name(), "Sample.Moved");
    assert!(exported[0].is_forwarder());
    assert_eq!(exported[0].assembly_name().map(|name| name.name.clone()), Some("Target".into()));

    match &exported[1].scope {
        ExportedTypeScope::Module(module) => {
            assert_eq!(module.name, "Extra.netmodule");
            assert_eq!(module.token.table_id(), Some(TableId::File));
        }
        other => panic!("unexpected scope {other:?}"),
    }
    Ok(())
}

/// Test that the entry point survives as a method token.
#[test]
fn test_entry_point() -> Result<()> {
    let module = ModuleDefinition::create_assembly(
        AssemblyNameReference::new("App", AssemblyVersion::new(1, 0, 0, 0)),
        "App.exe",
        ModuleKind::Console,
    );
    let program = TypeDefinition::new("App", "Program", 0, None);
    module.add_type(program.clone())?;
    let main = MethodDefinition::new("Main", MethodAttributes::STATIC, TypeSignature::Void);
    program.add_method(main.clone())?;
    module.set_entry_point(Some(main))?;

    let image = module.write()?;
    assert_eq!(image.info().kind, ModuleKind::Console);
    assert_eq!(image.info().entry_point, Token::from_parts(TableId::MethodDef, 1));

    let copy = ModuleDefinition::read(image, ReaderParameters::default())?;
    assert_eq!(copy.entry_point()?.map(|main| main.name.clone()), Some("Main".into()));
    Ok(())
}

/// Test that writing a module read back from metadata reproduces the same streams.
#[test]
fn test_rewrite_is_stable() -> Result<()> {
    let module = sample_assembly();
    let base = object_reference(&module)?;
    let class = TypeDefinition::new("Sample", "Stable", TypeAttributes::PUBLIC, Some(base));
    module.add_type(class.clone())?;
    class.add_field(FieldDefinition::new("x", FieldAttributes::PUBLIC, TypeSignature::R8))?;
    let method = MethodDefinition::new("Run", MethodAttributes::PUBLIC, TypeSignature::Void);
    method.add_parameter(ParameterDefinition::new("count", 0, TypeSignature::I4));
    class.add_method(method)?;

    let first = module.write()?;
    let copy = ModuleDefinition::read(first, ReaderParameters::new().with_reading_mode(ReadingMode::Immediate))?;
    let second = copy.write()?;
    let third = ModuleDefinition::read(second, ReaderParameters::default())?.write()?;

    assert_eq!(copy.write()?.streams(), third.streams());
    Ok(())
}
