//! Codecs for file locations, pattern sets and file collections.
//!
//! Locations are written as absolute paths and recreated through the
//! [`FileFactory`] visible to the reading isolate, so that a cached plan
//! resolves files the same way a freshly configured one would.

use crate::paths::{read_file, write_file};
use std::sync::Arc;
use tessera_graph::{Bindings, Codec, DecodeError, EncodeError, ObjectRef, ReadContext, WriteContext};
use tessera_model::{
    ArtifactCollection, Directory, FileCollection, FileCollectionElement, FileCollectionFactory,
    FileFactory, PatternSet, RegularFile,
};

const FILES: u8 = 0;
const DIRECTORY_TREE: u8 = 1;
const PROVIDER: u8 = 2;
const ARTIFACTS: u8 = 3;

/// Encodes a [`Directory`] as its path.
#[derive(Default)]
pub struct DirectoryCodec;

impl Codec<Arc<Directory>> for DirectoryCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<Directory>) -> Result<(), EncodeError> {
        write_file(ctx, value.path())
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<Directory>>, DecodeError> {
        let path = read_file(ctx)?;
        Ok(Some(ctx.service::<FileFactory>()?.dir(path)))
    }
}

/// Encodes a [`RegularFile`] as its path.
#[derive(Default)]
pub struct RegularFileCodec;

impl Codec<Arc<RegularFile>> for RegularFileCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<RegularFile>) -> Result<(), EncodeError> {
        write_file(ctx, value.path())
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<RegularFile>>, DecodeError> {
        let path = read_file(ctx)?;
        Ok(Some(ctx.service::<FileFactory>()?.file(path)))
    }
}

fn write_patterns(ctx: &mut WriteContext, patterns: &PatternSet) -> Result<(), EncodeError> {
    ctx.write_bool(patterns.case_sensitive)?;
    ctx.write_collection(&patterns.includes, |ctx, p| ctx.write_str(p))?;
    ctx.write_collection(&patterns.excludes, |ctx, p| ctx.write_str(p))
}

fn read_patterns(ctx: &mut ReadContext) -> Result<PatternSet, DecodeError> {
    let case_sensitive = ctx.read_bool()?;
    let includes = ctx.read_collection(|ctx| ctx.read_string())?;
    let excludes = ctx.read_collection(|ctx| ctx.read_string())?;
    Ok(PatternSet {
        includes,
        excludes,
        case_sensitive,
    })
}

/// Encodes a [`PatternSet`].
#[derive(Default)]
pub struct PatternSetCodec;

impl Codec<Arc<PatternSet>> for PatternSetCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<PatternSet>) -> Result<(), EncodeError> {
        write_patterns(ctx, value)
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<PatternSet>>, DecodeError> {
        Ok(Some(Arc::new(read_patterns(ctx)?)))
    }
}

/// Encodes a [`FileCollection`] element by element.
///
/// Provider elements go through the active codec, so a provider that can only
/// be computed at execution time stays lazy after a round trip.
#[derive(Default)]
pub struct FileCollectionCodec;

impl FileCollectionCodec {
    fn write_element(ctx: &mut WriteContext, element: &FileCollectionElement) -> Result<(), EncodeError> {
        match element {
            FileCollectionElement::Files(paths) => {
                ctx.write_byte(FILES)?;
                ctx.write_collection(paths, |ctx, path| write_file(ctx, path))
            }
            FileCollectionElement::DirectoryTree { dir, patterns } => {
                ctx.write_byte(DIRECTORY_TREE)?;
                write_file(ctx, dir)?;
                write_patterns(ctx, patterns)
            }
            FileCollectionElement::Provider(value) => {
                ctx.write_byte(PROVIDER)?;
                ctx.write(value)
            }
            FileCollectionElement::Artifacts(artifacts) => {
                ctx.write_byte(ARTIFACTS)?;
                ctx.write_object(&ObjectRef::from_arc(Arc::clone(artifacts)))
            }
        }
    }

    fn read_element(ctx: &mut ReadContext) -> Result<FileCollectionElement, DecodeError> {
        match ctx.read_byte()? {
            FILES => Ok(FileCollectionElement::Files(ctx.read_collection(read_file)?)),
            DIRECTORY_TREE => {
                let dir = read_file(ctx)?;
                let patterns = read_patterns(ctx)?;
                Ok(FileCollectionElement::DirectoryTree { dir, patterns })
            }
            PROVIDER => Ok(FileCollectionElement::Provider(ctx.read()?)),
            ARTIFACTS => Ok(FileCollectionElement::Artifacts(
                ctx.read_non_null::<ArtifactCollection>()?,
            )),
            other => Err(DecodeError::UnexpectedDiscriminant {
                what: "file collection element",
                value: i64::from(other),
            }),
        }
    }
}

impl Codec<Arc<FileCollection>> for FileCollectionCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<FileCollection>) -> Result<(), EncodeError> {
        ctx.write_collection(value.elements(), Self::write_element)
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<FileCollection>>, DecodeError> {
        let elements = ctx.read_collection(Self::read_element)?;
        Ok(Some(ctx.service::<FileCollectionFactory>()?.resolving(elements)))
    }
}

/// The file layer shared by the user and internal codecs.
pub fn file_types() -> Bindings {
    Bindings::of(|b| {
        b.bind::<Directory, _>(DirectoryCodec)
            .bind::<RegularFile, _>(RegularFileCodec)
            .bind::<PatternSet, _>(PatternSetCodec)
            .bind::<FileCollection, _>(FileCollectionCodec);
    })
}
