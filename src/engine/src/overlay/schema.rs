//! Image-reference schemas found in chart values.
//!
//! A mapping node is classified against a closed set of conventions, in
//! priority order; the first that matches wins.

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::oci::reference::{normalize, ImageReference};

/// Fields that may carry the repository next to a `registry` key.
const SPLIT_REPOSITORY_FIELDS: &[&str] = &["repository", "image", "name"];

const FLAT_REGISTRY: &str = "imageRegistry";
const FLAT_REPOSITORY: &str = "imageRepository";
const FLAT_TAG: &str = "imageTag";

/// Convention a chart uses to express an image reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaKind {
    /// `{registry, repository|image|name, tag}`
    SplitRegistryRepo,
    /// `{imageRegistry, imageRepository, imageTag}`
    FlattenedTriple,
    /// `{repository: <full path>, tag}`
    GenericRepoTag,
    /// Ad hoc string wrapped into `{repository, tag}` one level up
    FallbackWrap,
}

impl std::fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SplitRegistryRepo => "split-registry-repo",
            Self::FlattenedTriple => "flattened-triple",
            Self::GenericRepoTag => "generic-repo-tag",
            Self::FallbackWrap => "fallback-wrap",
        };
        f.write_str(name)
    }
}

/// A node-level schema match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSchema {
    SplitRegistryRepo { repository_field: &'static str },
    FlattenedTriple,
    GenericRepoTag,
}

impl NodeSchema {
    pub fn kind(&self) -> SchemaKind {
        match self {
            Self::SplitRegistryRepo { .. } => SchemaKind::SplitRegistryRepo,
            Self::FlattenedTriple => SchemaKind::FlattenedTriple,
            Self::GenericRepoTag => SchemaKind::GenericRepoTag,
        }
    }

    /// Replacement fields pointing at `destination`, in this schema.
    pub fn fields(&self, destination: &ImageReference) -> Mapping {
        let mut fields = Mapping::new();
        let tag = destination.tag_or_latest();
        match self {
            Self::SplitRegistryRepo { repository_field } => {
                insert(&mut fields, "registry", &destination.registry);
                insert(&mut fields, repository_field, &destination.repository);
                insert(&mut fields, "tag", tag);
            }
            Self::FlattenedTriple => {
                insert(&mut fields, FLAT_REGISTRY, &destination.registry);
                insert(&mut fields, FLAT_REPOSITORY, &destination.repository);
                insert(&mut fields, FLAT_TAG, tag);
            }
            Self::GenericRepoTag => {
                insert(&mut fields, "repository", &destination.identity());
                insert(&mut fields, "tag", tag);
            }
        }
        fields
    }
}

/// Fields written by a fallback wrap.
pub fn fallback_fields(destination: &ImageReference) -> Mapping {
    let mut fields = Mapping::new();
    insert(&mut fields, "repository", &destination.identity());
    insert(&mut fields, "tag", destination.tag_or_latest());
    fields
}

fn insert(fields: &mut Mapping, key: &str, value: &str) {
    fields.insert(
        Value::String(key.to_string()),
        Value::String(value.to_string()),
    );
}

fn string_field<'a>(node: &'a Mapping, key: &str) -> Option<&'a str> {
    node.get(key).and_then(Value::as_str)
}

/// Does `registry/repository` as written in a chart name `source`?
fn names_source(registry: &str, repository: &str, source: &ImageReference) -> bool {
    let registry = registry.trim().trim_end_matches('/');
    let repository = repository.trim().trim_start_matches('/');
    if registry.is_empty() || repository.is_empty() {
        return false;
    }
    let composed = normalize(&format!("{}/{}", registry, repository));
    source.identity_aliases().iter().any(|alias| *alias == composed)
}

/// Is `value` the full source path (tag and digest ignored)?
fn is_full_source_path(value: &str, source: &ImageReference) -> bool {
    match ImageReference::parse(&normalize(value.trim())) {
        Ok(parsed) => parsed.same_image(source),
        Err(_) => false,
    }
}

/// Classify a mapping node against `source`. First match wins: A, B, C.
pub fn classify(node: &Mapping, source: &ImageReference) -> Option<NodeSchema> {
    // A: registry + repository|image|name
    if let Some(registry) = string_field(node, "registry") {
        let field = SPLIT_REPOSITORY_FIELDS
            .iter()
            .copied()
            .find(|f| string_field(node, f).is_some());
        if let Some(field) = field {
            let repository = string_field(node, field).unwrap_or_default();
            if names_source(registry, repository, source) {
                return Some(NodeSchema::SplitRegistryRepo {
                    repository_field: field,
                });
            }
        }
    }

    // B: imageRegistry/imageRepository/imageTag
    if let Some(repository) = string_field(node, FLAT_REPOSITORY) {
        let matched = match string_field(node, FLAT_REGISTRY) {
            Some(registry) => names_source(registry, repository, source),
            None => is_full_source_path(repository, source),
        };
        if matched {
            return Some(NodeSchema::FlattenedTriple);
        }
    }

    // C: repository holding the full path, no registry field
    if !node.contains_key("registry") {
        if let Some(repository) = string_field(node, "repository") {
            if repository.contains('/') && is_full_source_path(repository, source) {
                return Some(NodeSchema::GenericRepoTag);
            }
        }
    }

    None
}

/// Does leaf string `value` mention the source repository path?
///
/// The path must sit on name boundaries: preceded by the start or a `/`,
/// followed by the end, `:` or `@`. This keeps `org/app` from matching
/// `org/app-sidecar`.
pub fn mentions_source(value: &str, source: &ImageReference) -> bool {
    let mut paths = vec![source.repository.as_str()];
    if let Some(short) = source.repository.strip_prefix("library/") {
        paths.push(short);
    }

    paths.into_iter().any(|path| {
        value.match_indices(path).any(|(start, matched)| {
            let before_ok = value[..start].chars().last().map_or(true, |c| c == '/');
            let after_ok = value[start + matched.len()..]
                .chars()
                .next()
                .map_or(true, |c| c == ':' || c == '@');
            before_ok && after_ok
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn source() -> ImageReference {
        ImageReference::parse("src.example.com/team/app:1.0").unwrap()
    }

    fn destination() -> ImageReference {
        ImageReference::parse("dst.example.com/mirror/app:1.0").unwrap()
    }

    #[test]
    fn test_classify_split_registry_repo() {
        let node = mapping("registry: src.example.com\nrepository: team/app\ntag: '1.0'\n");
        let schema = classify(&node, &source()).unwrap();
        assert_eq!(
            schema,
            NodeSchema::SplitRegistryRepo {
                repository_field: "repository"
            }
        );
        assert_eq!(
            schema.fields(&destination()),
            mapping("registry: dst.example.com\nrepository: mirror/app\ntag: '1.0'\n")
        );
    }

    #[test]
    fn test_classify_split_with_name_field() {
        let node = mapping("registry: src.example.com\nname: team/app\n");
        let schema = classify(&node, &source()).unwrap();
        let fields = schema.fields(&destination());
        assert_eq!(fields.get("name").and_then(Value::as_str), Some("mirror/app"));
    }

    #[test]
    fn test_classify_split_other_image_is_none() {
        let node = mapping("registry: src.example.com\nrepository: team/other\n");
        assert_eq!(classify(&node, &source()), None);
    }

    #[test]
    fn test_classify_flattened_triple() {
        let node = mapping(
            "imageRegistry: src.example.com\nimageRepository: team/app\nimageTag: '1.0'\n",
        );
        let schema = classify(&node, &source()).unwrap();
        assert_eq!(schema, NodeSchema::FlattenedTriple);
        assert_eq!(
            schema.fields(&destination()),
            mapping("imageRegistry: dst.example.com\nimageRepository: mirror/app\nimageTag: '1.0'\n")
        );
    }

    #[test]
    fn test_classify_generic_repo_tag() {
        let node = mapping("repository: src.example.com/team/app\ntag: '1.0'\n");
        let schema = classify(&node, &source()).unwrap();
        assert_eq!(schema, NodeSchema::GenericRepoTag);
        assert_eq!(
            schema.fields(&destination()),
            mapping("repository: dst.example.com/mirror/app\ntag: '1.0'\n")
        );
    }

    #[test]
    fn test_split_wins_over_generic() {
        // Both A and C shapes could be argued; A has priority
        let node = mapping("registry: src.example.com\nrepository: team/app\n");
        assert_eq!(classify(&node, &source()).unwrap().kind(), SchemaKind::SplitRegistryRepo);
    }

    #[test]
    fn test_docker_hub_short_names() {
        let nginx = ImageReference::parse("nginx:1.25").unwrap();
        let node = mapping("registry: docker.io\nrepository: nginx\n");
        assert!(classify(&node, &nginx).is_some());
        let node = mapping("repository: docker.io/library/nginx\n");
        assert!(classify(&node, &nginx).is_some());
    }

    #[test]
    fn test_misspelled_host_still_matches() {
        let src = ImageReference::parse("public.ecr.aws/karpenter/controller:1.0").unwrap();
        let node = mapping("registry: ecr-public.aws.com\nrepository: karpenter/controller\n");
        assert!(classify(&node, &src).is_some());
    }

    #[test]
    fn test_mentions_source_boundaries() {
        let src = source();
        assert!(mentions_source("src.example.com/team/app:1.0", &src));
        assert!(mentions_source("team/app", &src));
        assert!(mentions_source("mirror.local/team/app@sha256:abc", &src));
        assert!(!mentions_source("src.example.com/team/app-sidecar:1.0", &src));
        assert!(!mentions_source("src.example.com/myteam/app:1.0", &src));
    }
}
