//! Codecs for resolved dependency artifacts.
//!
//! Storing an artifact resolves its file. The cached plan gets back an
//! artifact whose file is already known, so loading never triggers
//! dependency resolution.

use crate::paths::{read_file, write_file};
use std::sync::Arc;
use tessera_graph::{Bindings, Codec, DecodeError, EncodeError, ObjectRef, ReadContext, WriteContext};
use tessera_model::{ArtifactCollection, ComponentArtifactId, ResolvableArtifact};

fn write_id(ctx: &mut WriteContext, id: &ComponentArtifactId) -> Result<(), EncodeError> {
    ctx.write_str(&id.component)?;
    ctx.write_str(&id.name)?;
    ctx.write_bool(id.classifier.is_some())?;
    if let Some(classifier) = &id.classifier {
        ctx.write_str(classifier)?;
    }
    ctx.write_str(&id.extension)
}

fn read_id(ctx: &mut ReadContext) -> Result<ComponentArtifactId, DecodeError> {
    let component = ctx.read_string()?;
    let name = ctx.read_string()?;
    let classifier = if ctx.read_bool()? {
        Some(ctx.read_string()?)
    } else {
        None
    };
    let extension = ctx.read_string()?;
    Ok(ComponentArtifactId {
        component,
        name,
        classifier,
        extension,
    })
}

/// Encodes a [`ResolvableArtifact`] once per isolate, resolving its file.
#[derive(Default)]
pub struct ResolvableArtifactCodec;

impl Codec<Arc<ResolvableArtifact>> for ResolvableArtifactCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<ResolvableArtifact>) -> Result<(), EncodeError> {
        let obj = ObjectRef::from_arc(Arc::clone(value));
        ctx.encode_preserving_identity(&obj, |ctx| {
            write_id(ctx, value.id())?;
            write_file(ctx, value.file())
        })
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<ResolvableArtifact>>, DecodeError> {
        let artifact = ctx.decode_preserving_identity_of(|ctx, _| {
            let id = read_id(ctx)?;
            let file = read_file(ctx)?;
            Ok(Arc::new(ResolvableArtifact::resolved(id, file)))
        })?;
        Ok(Some(artifact))
    }
}

/// Encodes an [`ArtifactCollection`] with its captured failures.
#[derive(Default)]
pub struct ArtifactCollectionCodec;

impl Codec<Arc<ArtifactCollection>> for ArtifactCollectionCodec {
    fn encode(&self, ctx: &mut WriteContext, value: &Arc<ArtifactCollection>) -> Result<(), EncodeError> {
        ctx.write_bool(value.is_lenient())?;
        ctx.write_collection(value.artifacts(), |ctx, artifact| {
            ctx.write_object(&ObjectRef::from_arc(Arc::clone(artifact)))
        })?;
        ctx.write_collection(value.failures(), |ctx, failure| ctx.write_str(failure))
    }

    fn decode(&self, ctx: &mut ReadContext) -> Result<Option<Arc<ArtifactCollection>>, DecodeError> {
        let lenient = ctx.read_bool()?;
        let artifacts = ctx.read_collection(|ctx| ctx.read_non_null::<ResolvableArtifact>())?;
        let failures = ctx.read_collection(|ctx| ctx.read_string())?;
        Ok(Some(Arc::new(ArtifactCollection::new(artifacts, failures, lenient))))
    }
}

/// The artifact layer.
pub fn artifact_types() -> Bindings {
    Bindings::of(|b| {
        b.bind::<ResolvableArtifact, _>(ResolvableArtifactCodec)
            .bind::<ArtifactCollection, _>(ArtifactCollectionCodec);
    })
}
