//! Per-module memoization of decoded metadata.
//!
//! [`MetadataSystem`] holds two kinds of storage:
//!
//! - row-id indexed arrays ([`RowCache`]) for entities that are created once and referenced
//!   from many places: types, members, references, specifications
//! - owner keyed maps ([`FactMap`]) for facts that belong to exactly one owner: ranges of
//!   custom attribute rows, constants, layouts, overrides, accessors
//!
//! The owner maps are filled by scanning their table once, on first use, and shrink as the
//! facts are decoded into the owning entities. A fact is therefore either still in its map or
//! attached to its entity, never both. The arrays never shrink while the module is alive.
//!
//! Only the metadata reader touches this module; no resolution logic lives here.

use std::{
    hash::Hash,
    sync::OnceLock,
};

use dashmap::DashMap;

use crate::{
    metadata::{
        signatures::TypeSignature,
        tables::{TableId, TableInfo},
        token::Token,
        typesystem::{
            AssemblyNameReferenceRc, EventDefinitionRc, ExportedTypeRc, FieldDefinitionRc,
            GenericInstanceMethodRc, GenericParameterRc, MemberReference, MethodDefinitionRc,
            ModuleReferenceRc, ParameterDefinitionRc, PropertyDefinitionRc, TypeDefinitionRc,
            TypeReferenceRc,
        },
    },
    Result,
};

/// A contiguous run of child rows: `length` rows starting at the 1-based `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Range {
    /// First row id
    pub start: u32,
    /// Number of rows
    pub length: u32,
}

impl Range {
    /// A range of `length` rows starting at `start`.
    #[must_use]
    pub fn new(start: u32, length: u32) -> Self {
        Range { start, length }
    }

    /// True if `rid` lies inside the range.
    #[must_use]
    pub fn contains(&self, rid: u32) -> bool {
        rid >= self.start && rid - self.start < self.length
    }

    /// The row ids of the range.
    pub fn rows(&self) -> impl Iterator<Item = u32> {
        self.start..self.start + self.length
    }

    /// Extend the range by one row if `rid` directly follows it.
    fn try_extend(&mut self, rid: u32) -> bool {
        if self.start + self.length == rid {
            self.length += 1;
            true
        } else {
            false
        }
    }
}

/// Entities of one table, indexed by row id.
///
/// Each slot is written at most once. Row ids are 1-based; zero and ids past the table
/// size answer `None`.
pub struct RowCache<T> {
    rows: Vec<OnceLock<T>>,
}

impl<T: Clone> RowCache<T> {
    /// A cache for a table with `count` rows.
    #[must_use]
    pub fn new(count: u32) -> Self {
        RowCache {
            rows: (0..count).map(|_| OnceLock::new()).collect(),
        }
    }

    fn slot(&self, rid: u32) -> Option<&OnceLock<T>> {
        let index = rid.checked_sub(1)? as usize;
        self.rows.get(index)
    }

    /// The entity of row `rid`, if it has been created.
    pub fn get(&self, rid: u32) -> Option<T> {
        self.slot(rid)?.get().cloned()
    }

    /// Store the entity of row `rid` and return the stored one.
    ///
    /// If the slot is already taken the existing entity is returned and `value` is dropped.
    /// Out of range row ids are not stored.
    pub fn set(&self, rid: u32, value: T) -> T {
        match self.slot(rid) {
            Some(slot) => slot.get_or_init(|| value).clone(),
            None => value,
        }
    }
}

/// Facts keyed by their owner, loaded from one table scan and consumed on read.
pub struct FactMap<K: Eq + Hash, V> {
    loaded: OnceLock<()>,
    map: DashMap<K, V>,
}

impl<K: Eq + Hash, V: Clone> Default for FactMap<K, V> {
    fn default() -> Self {
        FactMap {
            loaded: OnceLock::new(),
            map: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V: Clone> FactMap<K, V> {
    /// An empty, unloaded map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fill` unless the map has already been loaded.
    ///
    /// # Errors
    /// Propagates the error of `fill`; the map stays unloaded in that case.
    pub fn ensure<F>(&self, fill: F) -> Result<()>
    where
        F: FnOnce(&DashMap<K, V>) -> Result<()>,
    {
        if self.loaded.get().is_some() {
            return Ok(());
        }

        self.map.clear();
        fill(&self.map)?;
        let _ = self.loaded.set(());
        Ok(())
    }

    /// Decode the fact for `key` and remove it once `decode` succeeded.
    ///
    /// A failed decode leaves the fact in place, so the next read fails the same way.
    ///
    /// # Errors
    /// Propagates the error of `decode`.
    pub fn consume<R, F>(&self, key: &K, decode: F) -> Result<Option<R>>
    where
        F: FnOnce(V) -> Result<R>,
    {
        // the entry guard must not be held while decoding: decoding reenters the reader
        let Some(fact) = self.map.get(key).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };

        let value = decode(fact)?;
        self.map.remove(key);
        Ok(Some(value))
    }
}

/// Append `rid` to the ranges of `owner`, merging it into the last range when adjacent.
///
/// Owner-sorted tables produce one range per owner; unsorted ones produce several.
pub fn add_to_range<K: Eq + Hash>(map: &DashMap<K, Vec<Range>>, owner: K, rid: u32) {
    let mut ranges = map.entry(owner).or_default();
    let extended = ranges.last_mut().is_some_and(|last| last.try_extend(rid));
    if !extended {
        ranges.push(Range::new(rid, 1));
    }
}

/// The decoded-entity cache of one module.
pub struct MetadataSystem {
    /// `TypeDef` rows
    pub types: RowCache<TypeDefinitionRc>,
    /// `TypeRef` rows
    pub type_references: RowCache<TypeReferenceRc>,
    /// `TypeSpec` rows
    pub type_specs: RowCache<TypeSignature>,
    /// `Field` rows
    pub fields: RowCache<FieldDefinitionRc>,
    /// `MethodDef` rows
    pub methods: RowCache<MethodDefinitionRc>,
    /// `Param` rows
    pub parameters: RowCache<ParameterDefinitionRc>,
    /// `MemberRef` rows
    pub member_references: RowCache<MemberReference>,
    /// `MethodSpec` rows
    pub method_specs: RowCache<GenericInstanceMethodRc>,
    /// `Property` rows
    pub properties: RowCache<PropertyDefinitionRc>,
    /// `Event` rows
    pub events: RowCache<EventDefinitionRc>,
    /// `ModuleRef` rows
    pub module_references: RowCache<ModuleReferenceRc>,
    /// `AssemblyRef` rows
    pub assembly_references: RowCache<AssemblyNameReferenceRc>,
    /// `ExportedType` rows
    pub exported_types: RowCache<ExportedTypeRc>,
    /// `GenericParam` rows
    pub generic_parameters: RowCache<GenericParameterRc>,

    /// `CustomAttribute` rows by parent
    pub custom_attributes: FactMap<Token, Vec<Range>>,
    /// `DeclSecurity` rows by parent
    pub security_declarations: FactMap<Token, Vec<Range>>,
    /// `GenericParam` rows by owner
    pub generic_parameter_ranges: FactMap<Token, Vec<Range>>,
    /// `GenericParamConstraint` rows by generic parameter rid
    pub generic_constraints: FactMap<u32, Vec<Range>>,
    /// `InterfaceImpl` rows by class rid
    pub interfaces: FactMap<u32, Vec<Range>>,
    /// `MethodImpl` rows by body method rid
    pub overrides: FactMap<u32, Vec<Range>>,
    /// `MethodSemantics` rows by association
    pub semantics: FactMap<Token, Vec<Range>>,
    /// `Property` rows by declaring type rid, through `PropertyMap`
    pub property_ranges: FactMap<u32, Vec<Range>>,
    /// `Event` rows by declaring type rid, through `EventMap`
    pub event_ranges: FactMap<u32, Vec<Range>>,

    /// Nested type rids by enclosing type rid
    pub nested_types: FactMap<u32, Vec<u32>>,
    /// Enclosing type rid by nested type rid
    pub declaring_types: FactMap<u32, u32>,
    /// `Constant` rid by parent
    pub constants: FactMap<Token, u32>,
    /// `FieldMarshal` rid by parent
    pub marshal_infos: FactMap<Token, u32>,
    /// `ClassLayout` rid by type rid
    pub class_layouts: FactMap<u32, u32>,
    /// Explicit offset by field rid
    pub field_layouts: FactMap<u32, u32>,
    /// Initial data RVA by field rid
    pub field_rvas: FactMap<u32, u32>,
    /// `ImplMap` rid by method rid
    pub pinvokes: FactMap<u32, u32>,
    /// Combined semantics attributes by method rid
    pub method_semantics: FactMap<u32, u16>,
}

impl MetadataSystem {
    /// An empty cache sized from the module's row counts.
    #[must_use]
    pub fn new(info: &TableInfo) -> Self {
        MetadataSystem {
            types: RowCache::new(info.rows(TableId::TypeDef)),
            type_references: RowCache::new(info.rows(TableId::TypeRef)),
            type_specs: RowCache::new(info.rows(TableId::TypeSpec)),
            fields: RowCache::new(info.rows(TableId::Field)),
            methods: RowCache::new(info.rows(TableId::MethodDef)),
            parameters: RowCache::new(info.rows(TableId::Param)),
            member_references: RowCache::new(info.rows(TableId::MemberRef)),
            method_specs: RowCache::new(info.rows(TableId::MethodSpec)),
            properties: RowCache::new(info.rows(TableId::Property)),
            events: RowCache::new(info.rows(TableId::Event)),
            module_references: RowCache::new(info.rows(TableId::ModuleRef)),
            assembly_references: RowCache::new(info.rows(TableId::AssemblyRef)),
            exported_types: RowCache::new(info.rows(TableId::ExportedType)),
            generic_parameters: RowCache::new(info.rows(TableId::GenericParam)),
            custom_attributes: FactMap::new(),
            security_declarations: FactMap::new(),
            generic_parameter_ranges: FactMap::new(),
            generic_constraints: FactMap::new(),
            interfaces: FactMap::new(),
            overrides: FactMap::new(),
            semantics: FactMap::new(),
            property_ranges: FactMap::new(),
            event_ranges: FactMap::new(),
            nested_types: FactMap::new(),
            declaring_types: FactMap::new(),
            constants: FactMap::new(),
            marshal_infos: FactMap::new(),
            class_layouts: FactMap::new(),
            field_layouts: FactMap::new(),
            field_rvas: FactMap::new(),
            pinvokes: FactMap::new(),
            method_semantics: FactMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_ids_are_one_based() {
        let cache: RowCache<u32> = RowCache::new(2);
        assert_eq!(cache.get(0), None);
        assert_eq!(cache.get(1), None);
        assert_eq!(cache.set(1, 10), 10);
        assert_eq!(cache.set(1, 11), 10);
        assert_eq!(cache.get(1), Some(10));
        assert_eq!(cache.set(3, 30), 30);
        assert_eq!(cache.get(3), None);
    }

    #[test]
    fn facts_are_consumed() {
        let map: FactMap<u32, u32> = FactMap::new();
        map.ensure(|map| {
            map.insert(1, 100);
            map.insert(2, 200);
            Ok(())
        })
        .unwrap();

        // a second ensure does not refill
        map.ensure(|_| panic!("filled twice")).unwrap();

        assert_eq!(map.consume(&1, Ok).unwrap(), Some(100));
        assert_eq!(map.consume(&1, Ok).unwrap(), None);
        assert_eq!(map.consume(&2, |value| Ok(value + 1)).unwrap(), Some(201));
    }

    #[test]
    fn failed_decode_keeps_the_fact() {
        let map: FactMap<u32, u32> = FactMap::new();
        map.ensure(|map| {
            map.insert(1, 100);
            Ok(())
        })
        .unwrap();

        let failed = map.consume(&1, |_| -> Result<u32> { Err(crate::Error::OutOfBounds) });
        assert!(failed.is_err());
        let failed = map.consume(&1, |_| -> Result<u32> { Err(crate::Error::OutOfBounds) });
        assert!(failed.is_err());
        assert_eq!(map.consume(&1, Ok).unwrap(), Some(100));
    }

    #[test]
    fn failed_fill_stays_unloaded() {
        let map: FactMap<u32, u32> = FactMap::new();
        let result = map.ensure(|map| {
            map.insert(1, 1);
            Err(crate::Error::OutOfBounds)
        });
        assert!(result.is_err());

        // the partial fill is discarded by the retry
        map.ensure(|map| {
            map.insert(2, 2);
            Ok(())
        })
        .unwrap();
        assert_eq!(map.consume(&1, Ok).unwrap(), None);
        assert_eq!(map.consume(&2, Ok).unwrap(), Some(2));
    }

    #[test]
    fn disjoint_ranges() {
        let map: FactMap<Token, Vec<Range>> = FactMap::new();
        let owner = Token::new(0x0200_0001);
        map.ensure(|map| {
            for rid in [1, 2, 3, 7, 8] {
                add_to_range(map, owner, rid);
            }
            Ok(())
        })
        .unwrap();

        let ranges = map.consume(&owner, Ok).unwrap().unwrap();
        assert_eq!(ranges, vec![Range::new(1, 3), Range::new(7, 2)]);
        assert!(ranges[1].contains(8));
        assert!(!ranges[1].contains(9));
        assert!(map.consume(&owner, Ok).unwrap().is_none());
    }
}
