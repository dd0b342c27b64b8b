//! Benchmarks for reading and writing module metadata.
//!
//! - Building the streams of a synthetic module
//! - Loading it lazily and eagerly
//! - Decoding raw method signatures

extern crate dotmeta;

use criterion::{criterion_group, criterion_main, Criterion};
use dotmeta::{
    metadata::signatures::{SignatureReader, UnboundContext},
    prelude::*,
};
use std::hint::black_box;

/// A module with 100 classes of 10 fields and 10 methods each, all deriving from `System.Object`.
fn synthetic_module() -> ModuleDefinitionRc {
    let module = ModuleDefinition::create_assembly(
        AssemblyNameReference::new("Bench", AssemblyVersion::new(1, 0, 0, 0)),
        "Bench.dll",
        ModuleKind::Dll,
    );
    let corlib = module.corlib_reference().unwrap();
    let object = TypeReference::new(&module, "System", "Object", TypeReferenceScope::Assembly(corlib));

    for index in 0..100 {
        let class = TypeDefinition::new(
            "Bench",
            &format!("Class{index}"),
            TypeAttributes::PUBLIC,
            Some(TypeSignature::reference(&object, false)),
        );
        module.add_type(class.clone()).unwrap();

        for field in 0..10 {
            class
                .add_field(FieldDefinition::new(
                    &format!("field{field}"),
                    FieldAttributes::PRIVATE,
                    TypeSignature::I4,
                ))
                .unwrap();
        }
        for method in 0..10 {
            let method = MethodDefinition::new(
                &format!("Method{method}"),
                MethodAttributes::PUBLIC,
                TypeSignature::String,
            );
            method.add_parameter(ParameterDefinition::new("value", 0, TypeSignature::I8));
            class.add_method(method).unwrap();
        }
    }
    module
}

/// The written streams of [`synthetic_module`].
fn synthetic_streams() -> (MetadataStreams, ImageInfo) {
    let image = synthetic_module().write().unwrap();
    (image.streams().clone(), image.info().clone())
}

fn bench_write(c: &mut Criterion) {
    let module = synthetic_module();

    c.bench_function("write_synthetic_module", |b| {
        b.iter(|| {
            let image = module.write().unwrap();
            black_box(image)
        });
    });
}

/// Opening a module in deferred mode only decodes the type list.
fn bench_read_deferred(c: &mut Criterion) {
    let (streams, info) = synthetic_streams();

    c.bench_function("read_deferred_types", |b| {
        b.iter(|| {
            let image = MetadataImage::new(black_box(streams.clone()), info.clone()).unwrap();
            let module = ModuleDefinition::read(image, ReaderParameters::default()).unwrap();
            black_box(module.types().unwrap().len())
        });
    });
}

fn bench_read_immediate(c: &mut Criterion) {
    let (streams, info) = synthetic_streams();

    c.bench_function("read_immediate", |b| {
        b.iter(|| {
            let image = MetadataImage::new(black_box(streams.clone()), info.clone()).unwrap();
            let parameters = ReaderParameters::new().with_reading_mode(ReadingMode::Immediate);
            let module = ModuleDefinition::read(image, parameters).unwrap();
            black_box(module)
        });
    });
}

/// Signature: instance class [mscorlib]System.Object Method(int32, string, int64[])
fn bench_method_signature(c: &mut Criterion) {
    // HASTHIS, 3 params, CLASS TypeRef 1, I4, STRING, SZARRAY I8
    let signature = [0x20, 0x03, 0x12, 0x05, 0x08, 0x0E, 0x1D, 0x0A];

    c.bench_function("sig_method_class_return", |b| {
        b.iter(|| {
            let mut context = UnboundContext;
            let mut reader = SignatureReader::new(black_box(&signature), &mut context);
            black_box(reader.read_method_signature().unwrap())
        });
    });
}

/// Rewriting a loaded module: a full decode followed by a fresh build.
fn bench_rewrite(c: &mut Criterion) {
    let (streams, info) = synthetic_streams();

    c.bench_function("rewrite_loaded_module", |b| {
        b.iter(|| {
            let image = MetadataImage::new(streams.clone(), info.clone()).unwrap();
            let module = ModuleDefinition::read(image, ReaderParameters::default()).unwrap();
            black_box(module.write().unwrap())
        });
    });
}

criterion_group!(
    benches,
    bench_write,
    bench_read_deferred,
    bench_read_immediate,
    bench_method_signature,
    bench_rewrite
);
criterion_main!(benches);
