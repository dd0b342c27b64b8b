//! On-demand decoding of a module's tables into the entity graph.
//!
//! The [`MetadataReader`] is owned by a read [`ModuleDefinition`]. Every lazy accessor of
//! an entity that was read from metadata ends up here, asking for exactly the rows it needs:
//! the fields of one type, the custom attributes of one owner, the constant of one field.
//!
//! # Reader state
//!
//! All decode operations of one module share a single [`ReaderState`]: the cursor into the
//! tables stream and the generic context used to bind `VAR`/`MVAR` elements. A decode
//! operation enters the state through a [`StateGuard`], which
//!
//! 1. waits until no other thread is decoding in this module (the same thread may re-enter),
//! 2. saves the cursor and generic context, and optionally installs a new context,
//! 3. restores both when dropped, including on early return through `?`.
//!
//! Lazy reads nest freely: decoding a method signature may decode a type reference, which
//! may decode its declaring reference. To the caller every read looks synchronous and free
//! of side effects on the shared state.
//!
//! # Ranges
//!
//! Child rows of the list-table kind (fields and methods of a type, parameters of a method,
//! properties and events through their map tables) are found through the start column of the
//! owner row and the start column of the next owner, or the end of the child table for the
//! last owner. Pointer tables are followed when present. The reverse direction, from a child
//! row to its owner, uses a binary search over the owner's start column.

mod attributes;
mod members;
mod tokens;
mod types;

use std::{
    ops::Index,
    sync::{Arc, Condvar, Mutex, OnceLock, Weak},
    thread::{self, ThreadId},
};

use strum::IntoEnumIterator;
use tracing::debug;

use crate::{
    file::io::read_le_at_dyn,
    metadata::{
        cache::{MetadataSystem, Range},
        image::MetadataImage,
        signatures::{
            GenericParamSig, SignatureContext, SignatureReader, TypeHandle, TypeSignature,
            TypeTokenTarget,
        },
        tables::{columns, CodedIndexType, TableId},
        token::Token,
        typesystem::{
            GenericOwnerRef, GenericParameterKind, MethodDefinition, MethodDefinitionRc,
            ModuleDefinition, TypeDefinition, TypeDefinitionRc,
        },
    },
    Error, Result,
};

/// Maximum nesting of decode operations before the metadata is considered cyclic.
pub const MAX_READ_DEPTH: usize = 64;

/// The type and method whose generic parameters are in scope while decoding.
#[derive(Clone, Default)]
pub(crate) struct GenericContext {
    type_owner: Option<Weak<TypeDefinition>>,
    method_owner: Option<Weak<MethodDefinition>>,
}

impl GenericContext {
    /// No generic parameters in scope; `VAR`/`MVAR` decode to unbound placeholders.
    pub(crate) fn none() -> Self {
        Self::default()
    }

    /// The parameters of `definition`.
    pub(crate) fn for_type(definition: &TypeDefinitionRc) -> Self {
        GenericContext {
            type_owner: Some(Arc::downgrade(definition)),
            method_owner: None,
        }
    }

    /// The parameters of `method` and its declaring type.
    pub(crate) fn for_method(method: &MethodDefinitionRc) -> Self {
        GenericContext {
            type_owner: method.declaring_type().map(|owner| Arc::downgrade(&owner)),
            method_owner: Some(Arc::downgrade(method)),
        }
    }

    fn bind(&self, kind: GenericParameterKind, position: u16) -> GenericParamSig {
        let owner = match kind {
            GenericParameterKind::Type => self.type_owner.clone().map(GenericOwnerRef::Type),
            GenericParameterKind::Method => self.method_owner.clone().map(GenericOwnerRef::Method),
        };

        GenericParamSig {
            kind,
            position,
            owner,
        }
    }
}

/// Cursor and generic context shared by all decode operations of one module.
#[derive(Default)]
pub(crate) struct ReaderState {
    position: usize,
    context: GenericContext,
    depth: usize,
}

#[derive(Default)]
struct GateOwner {
    thread: Option<ThreadId>,
    depth: usize,
}

/// A lock the owning thread may enter repeatedly.
#[derive(Default)]
struct ReadGate {
    owner: Mutex<GateOwner>,
    released: Condvar,
}

impl ReadGate {
    fn enter(&self) {
        let current = thread::current().id();
        let owner = lock!(self.owner);
        let mut owner = self
            .released
            .wait_while(owner, |owner| owner.thread.is_some_and(|thread| thread != current))
            .expect("Failed to acquire lock");
        owner.thread = Some(current);
        owner.depth += 1;
    }

    fn leave(&self) {
        let mut owner = lock!(self.owner);
        owner.depth -= 1;
        if owner.depth == 0 {
            owner.thread = None;
            self.released.notify_one();
        }
    }
}

/// Saves the reader state on creation and restores it on drop.
pub(crate) struct StateGuard<'r> {
    reader: &'r MetadataReader,
    position: usize,
    context: GenericContext,
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = lock!(self.reader.state);
            state.position = self.position;
            state.context = std::mem::take(&mut self.context);
            state.depth -= 1;
        }
        self.reader.gate.leave();
    }
}

/// The raw column values of one table row, in schema order.
pub(crate) struct Row(Vec<u32>);

impl Index<usize> for Row {
    type Output = u32;

    fn index(&self, column: usize) -> &u32 {
        &self.0[column]
    }
}

/// Resolves tokens and generic parameters found in signature blobs against the module.
pub(crate) struct ReaderContext<'r> {
    reader: &'r MetadataReader,
}

impl SignatureContext for ReaderContext<'_> {
    fn resolve_type_token(&mut self, token: Token) -> Result<TypeTokenTarget> {
        match token.table_id() {
            Some(TableId::TypeDef) => Ok(TypeTokenTarget::Handle(TypeHandle::definition(
                &self.reader.get_type(token.row())?,
            ))),
            Some(TableId::TypeRef) => Ok(TypeTokenTarget::Handle(TypeHandle::reference(
                &self.reader.get_type_reference(token.row())?,
            ))),
            Some(TableId::TypeSpec) => Ok(TypeTokenTarget::Spec(
                self.reader.get_type_spec(token.row())?,
            )),
            _ => Err(malformed_error!("Token {} can not name a type", token)),
        }
    }

    fn generic_parameter(&mut self, kind: GenericParameterKind, position: u16) -> GenericParamSig {
        lock!(self.reader.state).context.bind(kind, position)
    }
}

/// Decodes rows of one module on demand. See the [module documentation](self).
pub struct MetadataReader {
    image: MetadataImage,
    cache: MetadataSystem,
    module: OnceLock<Weak<ModuleDefinition>>,
    gate: ReadGate,
    state: Mutex<ReaderState>,
}

impl MetadataReader {
    /// Wrap `image`; the cache is sized from its row counts.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the image has no `Module` row.
    pub fn new(image: MetadataImage) -> Result<Self> {
        if image.row_count(TableId::Module) == 0 {
            return Err(malformed_error!("The Module table has no rows"));
        }

        for table in TableId::iter() {
            let rows = image.row_count(table);
            if rows > 0 {
                debug!(table = ?table, rows, "metadata table");
            }
        }

        let cache = MetadataSystem::new(image.table_info());
        Ok(MetadataReader {
            image,
            cache,
            module: OnceLock::new(),
            gate: ReadGate::default(),
            state: Mutex::new(ReaderState::default()),
        })
    }

    /// Bind the reader to the module that owns it. Only the first call has an effect.
    pub(crate) fn set_module(&self, module: Weak<ModuleDefinition>) {
        let _ = self.module.set(module);
    }

    /// The owning module, as stored in every entity created by this reader.
    pub(crate) fn module_weak(&self) -> Weak<ModuleDefinition> {
        self.module.get().cloned().unwrap_or_default()
    }

    /// Enter the reader state, optionally installing a new generic context.
    pub(crate) fn enter(&self, context: Option<GenericContext>) -> Result<StateGuard<'_>> {
        self.gate.enter();

        let mut state = lock!(self.state);
        if state.depth >= MAX_READ_DEPTH {
            drop(state);
            self.gate.leave();
            return Err(Error::RecursionLimit(MAX_READ_DEPTH));
        }

        state.depth += 1;
        let saved_context = match context {
            Some(context) => std::mem::replace(&mut state.context, context),
            None => state.context.clone(),
        };

        Ok(StateGuard {
            reader: self,
            position: state.position,
            context: saved_context,
        })
    }

    /// Position the cursor on row `rid` of `table`. Returns false if the row does not exist.
    pub(crate) fn move_to(&self, table: TableId, rid: u32) -> bool {
        match self.image.row_offset(table, rid) {
            Some(offset) => {
                lock!(self.state).position = offset;
                true
            }
            None => false,
        }
    }

    /// Read the row at the cursor and advance past it.
    pub(crate) fn read_row(&self, table: TableId) -> Result<Row> {
        let info = self.image.table_info();
        let data = self.image.tables_data();
        let mut state = lock!(self.state);

        let schema = columns(table);
        let mut values = Vec::with_capacity(schema.len());
        for column in schema {
            values.push(read_le_at_dyn(
                data,
                &mut state.position,
                info.is_large_column(*column),
            )?);
        }
        Ok(Row(values))
    }

    /// Read row `rid` of `table`, which must exist.
    pub(crate) fn row(&self, table: TableId, rid: u32) -> Result<Row> {
        if !self.move_to(table, rid) {
            return Err(malformed_error!(
                "{:?} row {} does not exist ({} rows)",
                table,
                rid,
                self.rows(table)
            ));
        }
        self.read_row(table)
    }

    pub(crate) fn rows(&self, table: TableId) -> u32 {
        self.image.row_count(table)
    }

    /// Visit every row of `table` in order. `visit` may re-enter the reader.
    pub(crate) fn scan<F>(&self, table: TableId, mut visit: F) -> Result<()>
    where
        F: FnMut(u32, Row) -> Result<()>,
    {
        let _guard = self.enter(None)?;
        for rid in 1..=self.rows(table) {
            let row = self.row(table, rid)?;
            visit(rid, row)?;
        }
        Ok(())
    }

    pub(crate) fn string(&self, index: u32) -> Result<String> {
        Ok(self.image.strings()?.get(index as usize)?.to_string())
    }

    pub(crate) fn blob(&self, index: u32) -> Result<&[u8]> {
        self.image.blobs()?.get(index as usize)
    }

    pub(crate) fn guid(&self, index: u32) -> Result<uguid::Guid> {
        self.image.guids()?.get(index as usize)
    }

    pub(crate) fn coded(&self, kind: CodedIndexType, value: u32) -> Result<Token> {
        kind.decompress(value)
    }

    /// Decode the blob at `index` with a signature reader bound to this module.
    pub(crate) fn read_signature<T, F>(&self, index: u32, read: F) -> Result<T>
    where
        F: FnOnce(&mut SignatureReader<'_, ReaderContext<'_>>) -> Result<T>,
    {
        let data = self.blob(index)?;
        let mut context = ReaderContext { reader: self };
        let mut reader = SignatureReader::new(data, &mut context);
        read(&mut reader)
    }

    /// The rows of a list-table child range owned by row `owner` of `owner_table`.
    ///
    /// `column` is the start column in the owner table. The returned range is expressed in
    /// logical rows: indices into `pointer` if that table has rows, into `child` otherwise.
    pub(crate) fn list_range(
        &self,
        owner_table: TableId,
        column: usize,
        owner: u32,
        child: TableId,
        pointer: TableId,
    ) -> Result<Range> {
        let count = self.child_count(child, pointer);
        let start = self.row(owner_table, owner)?[column];
        let end = if owner < self.rows(owner_table) {
            self.row(owner_table, owner + 1)?[column]
        } else {
            count + 1
        };

        if count == 0 {
            return Ok(Range::default());
        }
        if start == 0 || end < start || end > count + 1 {
            return Err(malformed_error!(
                "{:?} row {} lists {:?} rows {}..{} of {}",
                owner_table,
                owner,
                child,
                start,
                end,
                count
            ));
        }

        Ok(Range::new(start, end - start))
    }

    fn child_count(&self, child: TableId, pointer: TableId) -> u32 {
        match self.rows(pointer) {
            0 => self.rows(child),
            rows => rows,
        }
    }

    /// Map a logical child row to the physical row, through `pointer` if it has rows.
    pub(crate) fn resolve_pointer(&self, pointer: TableId, logical: u32) -> Result<u32> {
        if self.rows(pointer) == 0 {
            return Ok(logical);
        }
        Ok(self.row(pointer, logical)?[0])
    }

    /// Map a physical child row to its logical row, searching `pointer` if it has rows.
    pub(crate) fn logical_row(&self, pointer: TableId, physical: u32) -> Result<u32> {
        if self.rows(pointer) == 0 {
            return Ok(physical);
        }

        for logical in 1..=self.rows(pointer) {
            if self.row(pointer, logical)?[0] == physical {
                return Ok(logical);
            }
        }
        Err(malformed_error!(
            "{:?} does not list row {}",
            pointer,
            physical
        ))
    }

    /// Find the owner row whose child range contains the logical row `child`.
    ///
    /// Owners store ascending, non-overlapping range starts; empty ranges share their start
    /// with the next owner, so the last owner starting at or before `child` is the one.
    pub(crate) fn binary_range_search(
        &self,
        owner_table: TableId,
        column: usize,
        child: u32,
        child_table: TableId,
        pointer: TableId,
    ) -> Result<Option<u32>> {
        let owners = self.rows(owner_table);
        if owners == 0 || child == 0 || child > self.child_count(child_table, pointer) {
            return Ok(None);
        }

        let (mut low, mut high) = (1_u32, owners);
        let mut found = None;
        while low <= high {
            let middle = low + (high - low) / 2;
            let start = self.row(owner_table, middle)?[column];
            if start <= child {
                found = Some(middle);
                low = middle + 1;
            } else {
                if middle == 1 {
                    break;
                }
                high = middle - 1;
            }
        }

        let Some(owner) = found else {
            return Ok(None);
        };
        let range = self.list_range(owner_table, column, owner, child_table, pointer)?;
        Ok(range.contains(child).then_some(owner))
    }

    /// The signature standing for a `TypeDefOrRef` token, `None` for the null token.
    pub(crate) fn type_signature(&self, token: Token) -> Result<Option<TypeSignature>> {
        if token.is_null() {
            return Ok(None);
        }

        let mut context = ReaderContext { reader: self };
        match context.resolve_type_token(token)? {
            TypeTokenTarget::Handle(handle) => Ok(Some(TypeSignature::Class(handle))),
            TypeTokenTarget::Spec(signature) => Ok(Some(signature)),
        }
    }

    /// The generic context of the owner of a `GenericParam` row.
    pub(crate) fn generic_owner_context(&self, owner: Token) -> Result<GenericContext> {
        match owner.table_id() {
            Some(TableId::TypeDef) => Ok(GenericContext::for_type(&self.get_type(owner.row())?)),
            Some(TableId::MethodDef) => {
                Ok(GenericContext::for_method(&self.get_method(owner.row())?))
            }
            _ => Err(malformed_error!("Token {} can not own generic parameters", owner)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{
        image_with_rows, RowWriter, NAME_OBJECT, NAME_SYSTEM, NAME_TEST, SIG_FIELD_I4,
        SIG_METHOD_I4_ARG,
    };

    #[test]
    fn list_range_of_last_owner() {
        // three types; fields 1-2, none, 3-5
        let image = image_with_rows(|rows| {
            rows.add(TableId::Module, RowWriter::module(1));
            rows.add(TableId::TypeDef, RowWriter::type_def(0, 1, 1, 1));
            rows.add(TableId::TypeDef, RowWriter::type_def(0, 1, 3, 1));
            rows.add(TableId::TypeDef, RowWriter::type_def(0, 1, 3, 1));
            for _ in 0..5 {
                rows.add(TableId::Field, RowWriter::field(0, 1, 0));
            }
        });
        let reader = MetadataReader::new(image).unwrap();
        let _guard = reader.enter(None).unwrap();

        let range = |owner| {
            reader
                .list_range(TableId::TypeDef, 4, owner, TableId::Field, TableId::FieldPtr)
                .unwrap()
        };
        assert_eq!(range(1), Range::new(1, 2));
        assert_eq!(range(2), Range::new(3, 0));
        assert_eq!(range(3), Range::new(3, 3));

        let owner = |child| {
            reader
                .binary_range_search(TableId::TypeDef, 4, child, TableId::Field, TableId::FieldPtr)
                .unwrap()
        };
        assert_eq!(owner(1), Some(1));
        assert_eq!(owner(2), Some(1));
        assert_eq!(owner(3), Some(3));
        assert_eq!(owner(5), Some(3));
        assert_eq!(owner(6), None);
        assert_eq!(owner(0), None);
    }

    #[test]
    fn fields_are_listed_through_field_pointers() {
        // FieldPtr swaps the two physical rows: type 1 owns "System", type 2 owns "Object"
        let image = image_with_rows(|rows| {
            rows.add(TableId::Module, RowWriter::module(1));
            rows.add(TableId::TypeDef, RowWriter::type_def(0, NAME_TEST, 1, 1));
            rows.add(TableId::TypeDef, RowWriter::type_def(0, NAME_TEST, 2, 1));
            rows.add(TableId::FieldPtr, RowWriter::pointer(2));
            rows.add(TableId::FieldPtr, RowWriter::pointer(1));
            rows.add(TableId::Field, RowWriter::field(0, NAME_OBJECT, SIG_FIELD_I4));
            rows.add(TableId::Field, RowWriter::field(0, NAME_SYSTEM, SIG_FIELD_I4));
        });
        let reader = MetadataReader::new(image).unwrap();

        let first = reader.read_fields(Token::from_parts(TableId::TypeDef, 1)).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name, "System");
        assert_eq!(first[0].token, Token::from_parts(TableId::Field, 2));

        let second = reader.read_fields(Token::from_parts(TableId::TypeDef, 2)).unwrap();
        assert_eq!(second[0].name, "Object");
        assert_eq!(second[0].field_type, TypeSignature::I4);

        let _guard = reader.enter(None).unwrap();
        assert_eq!(reader.resolve_pointer(TableId::FieldPtr, 1).unwrap(), 2);
        assert_eq!(reader.logical_row(TableId::FieldPtr, 1).unwrap(), 2);
        let owner = reader
            .binary_range_search(TableId::TypeDef, 4, 2, TableId::Field, TableId::FieldPtr)
            .unwrap();
        assert_eq!(owner, Some(2));
        assert!(reader.logical_row(TableId::FieldPtr, 3).is_err());
    }

    #[test]
    fn parameters_are_listed_through_param_pointers() {
        // ParamPtr swaps the two physical rows: method 1 owns "System", method 2 owns "Object"
        let image = image_with_rows(|rows| {
            rows.add(TableId::Module, RowWriter::module(1));
            rows.add(TableId::TypeDef, RowWriter::type_def(0, NAME_TEST, 1, 1));
            rows.add(TableId::MethodDef, RowWriter::method_def(0, NAME_TEST, SIG_METHOD_I4_ARG, 1));
            rows.add(TableId::MethodDef, RowWriter::method_def(0, NAME_TEST, SIG_METHOD_I4_ARG, 2));
            rows.add(TableId::ParamPtr, RowWriter::pointer(2));
            rows.add(TableId::ParamPtr, RowWriter::pointer(1));
            rows.add(TableId::Param, RowWriter::param(0, 1, NAME_OBJECT));
            rows.add(TableId::Param, RowWriter::param(0, 1, NAME_SYSTEM));
        });
        let reader = MetadataReader::new(image).unwrap();

        let methods = reader.read_methods(Token::from_parts(TableId::TypeDef, 1)).unwrap();
        assert_eq!(methods.len(), 2);

        let first = methods[0].parameters();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].name, "System");
        assert_eq!(first[0].token, Token::from_parts(TableId::Param, 2));
        assert_eq!(methods[1].parameters()[0].name, "Object");

        let _guard = reader.enter(None).unwrap();
        let logical = reader.logical_row(TableId::ParamPtr, 1).unwrap();
        assert_eq!(logical, 2);
        let owner = reader
            .binary_range_search(TableId::MethodDef, 5, logical, TableId::Param, TableId::ParamPtr)
            .unwrap();
        assert_eq!(owner, Some(2));
    }

    #[test]
    fn guard_restores_position_and_context() {
        let image = image_with_rows(|rows| {
            rows.add(TableId::Module, RowWriter::module(1));
            rows.add(TableId::TypeDef, RowWriter::type_def(0, 1, 1, 1));
            rows.add(TableId::TypeDef, RowWriter::type_def(0, 1, 1, 1));
        });
        let reader = MetadataReader::new(image).unwrap();

        let outer = reader.enter(None).unwrap();
        assert!(reader.move_to(TableId::TypeDef, 1));
        let position = lock!(reader.state).position;
        {
            let definition = TypeDefinition::new("", "C", 0, None);
            let _inner = reader.enter(Some(GenericContext::for_type(&definition))).unwrap();
            assert!(reader.move_to(TableId::TypeDef, 2));
            assert!(lock!(reader.state).context.type_owner.is_some());
            assert!(!reader.move_to(TableId::TypeDef, 3));
        }
        let state = lock!(reader.state);
        assert_eq!(state.position, position);
        assert!(state.context.type_owner.is_none());
        assert_eq!(state.depth, 1);
        drop(state);
        drop(outer);
        assert_eq!(lock!(reader.state).depth, 0);
    }

    #[test]
    fn nesting_is_bounded() {
        let image = image_with_rows(|rows| {
            rows.add(TableId::Module, RowWriter::module(1));
        });
        let reader = MetadataReader::new(image).unwrap();

        let mut guards = Vec::new();
        for _ in 0..MAX_READ_DEPTH {
            guards.push(reader.enter(None).unwrap());
        }
        assert!(matches!(reader.enter(None), Err(Error::RecursionLimit(_))));
        guards.clear();
        assert!(reader.enter(None).is_ok());
    }

    #[test]
    fn context_binds_generic_parameters() {
        let definition = TypeDefinition::new("", "G`1", 0, None);
        let context = GenericContext::for_type(&definition);
        assert!(context.bind(GenericParameterKind::Type, 0).is_bound());
        assert!(!context.bind(GenericParameterKind::Method, 0).is_bound());
        assert!(!GenericContext::none().bind(GenericParameterKind::Type, 0).is_bound());
    }
}
