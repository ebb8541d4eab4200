use crate::appstate::errors::{AppStateError, Result};
use crate::appstate::processor::PatchList;
use crate::binary::{Node, NodeBuilder};
use crate::proto;
use crate::store::traits::AppStateBlobDownloader;
use log::debug;
use prost::Message;

/// The five synced collections, in whatsapp's priority order.
pub const ALL_PATCH_NAMES: [&str; 5] = [
    "critical_block",
    "critical_unblock_low",
    "regular_high",
    "regular_low",
    "regular",
];

/// Builds the `<sync><collection/></sync>` query content for one collection.
pub fn build_fetch_patches_query(name: &str, version: u64) -> Node {
    NodeBuilder::new("sync")
        .children([NodeBuilder::new("collection")
            .attr("name", name)
            .attr("version", version.to_string())
            .attr("return_snapshot", "false")
            .build()])
        .build()
}

/// Parses an IQ response into a [`PatchList`], downloading and inlining any
/// externally stored patch blobs through the host's media helper.
pub async fn parse_patch_list(
    name: &str,
    resp: &Node,
    downloader: Option<&dyn AppStateBlobDownloader>,
) -> Result<PatchList> {
    let collection = resp
        .get_child_by_path(&["sync", "collection"])
        .ok_or(AppStateError::MalformedResponse("missing <collection>"))?;

    let mut attrs = collection.attr_parser();
    let has_more_patches = attrs.optional_bool("has_more_patches");

    let mut patches = Vec::new();
    if let Some(patches_node) = collection.get_optional_child("patches") {
        for child in patches_node.children() {
            let Some(bytes) = child.content_bytes() else {
                continue;
            };
            let mut patch = proto::SyncdPatch::decode(bytes)?;
            if let Some(blob_ref) = patch.external_mutations.take() {
                debug!(target: "Client/AppState",
                    "Patch for '{name}' carries external mutations, downloading blob");
                let blob = download_blob(downloader, &blob_ref).await?;
                patch.mutations = proto::SyncdMutations::decode(blob.as_slice())?.mutations;
            }
            patches.push(patch);
        }
    }

    let mut snapshot = None;
    if let Some(snapshot_node) = collection.get_optional_child("snapshot") {
        if let Some(bytes) = snapshot_node.content_bytes() {
            // The snapshot arrives either inline or as a blob reference.
            let raw = match proto::ExternalBlobReference::decode(bytes) {
                Ok(blob_ref) if blob_ref.direct_path.is_some() => {
                    debug!(target: "Client/AppState",
                        "Snapshot for '{name}' is an external blob, downloading");
                    download_blob(downloader, &blob_ref).await?
                }
                _ => bytes.to_vec(),
            };
            snapshot = Some(proto::SyncdSnapshot::decode(raw.as_slice())?);
        }
    }

    Ok(PatchList {
        name: name.to_string(),
        has_more_patches,
        patches,
        snapshot,
    })
}

async fn download_blob(
    downloader: Option<&dyn AppStateBlobDownloader>,
    blob_ref: &proto::ExternalBlobReference,
) -> Result<Vec<u8>> {
    let downloader = downloader.ok_or(AppStateError::NoBlobDownloader)?;
    downloader
        .download(blob_ref)
        .await
        .map_err(|e| AppStateError::BlobDownload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::traits::AppStateBlobDownloader;
    use async_trait::async_trait;

    #[test]
    fn query_shape() {
        let node = build_fetch_patches_query("regular", 9);
        let collection = node.get_optional_child("collection").unwrap();
        assert_eq!(
            collection.attrs.get("name").map(String::as_str),
            Some("regular")
        );
        assert_eq!(collection.attrs.get("version").map(String::as_str), Some("9"));
        assert_eq!(
            collection.attrs.get("return_snapshot").map(String::as_str),
            Some("false")
        );
    }

    fn sync_response(patches: Vec<Node>, has_more: bool) -> Node {
        NodeBuilder::new("iq")
            .attr("type", "result")
            .children([NodeBuilder::new("sync")
                .children([NodeBuilder::new("collection")
                    .attr("name", "regular")
                    .attr("has_more_patches", has_more.to_string())
                    .children([NodeBuilder::new("patches").children(patches).build()])
                    .build()])
                .build()])
            .build()
    }

    #[tokio::test]
    async fn parses_inline_patches() {
        let patch = proto::SyncdPatch {
            version: Some(proto::SyncdVersion { version: Some(3) }),
            ..Default::default()
        };
        let resp = sync_response(
            vec![NodeBuilder::new("patch").bytes(patch.encode_to_vec()).build()],
            true,
        );

        let list = parse_patch_list("regular", &resp, None).await.unwrap();
        assert!(list.has_more_patches);
        assert_eq!(list.patches.len(), 1);
        assert_eq!(
            list.patches[0].version.as_ref().unwrap().version,
            Some(3)
        );
    }

    struct CannedDownloader(Vec<u8>);

    #[async_trait]
    impl AppStateBlobDownloader for CannedDownloader {
        async fn download(
            &self,
            _blob_ref: &proto::ExternalBlobReference,
        ) -> anyhow::Result<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn inlines_external_mutations() {
        let external = proto::SyncdMutations {
            mutations: vec![proto::SyncdMutation {
                operation: Some(proto::SyncdOperation::Set as i32),
                record: None,
            }],
        };
        let patch = proto::SyncdPatch {
            external_mutations: Some(proto::ExternalBlobReference {
                direct_path: Some("/v/blob".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let resp = sync_response(
            vec![NodeBuilder::new("patch").bytes(patch.encode_to_vec()).build()],
            false,
        );

        let downloader = CannedDownloader(external.encode_to_vec());
        let list = parse_patch_list("regular", &resp, Some(&downloader))
            .await
            .unwrap();
        assert_eq!(list.patches[0].mutations.len(), 1);
        assert!(list.patches[0].external_mutations.is_none());
    }

    #[tokio::test]
    async fn external_blob_without_downloader_is_an_error() {
        let patch = proto::SyncdPatch {
            external_mutations: Some(proto::ExternalBlobReference::default()),
            ..Default::default()
        };
        let resp = sync_response(
            vec![NodeBuilder::new("patch").bytes(patch.encode_to_vec()).build()],
            false,
        );

        assert!(matches!(
            parse_patch_list("regular", &resp, None).await,
            Err(AppStateError::NoBlobDownloader)
        ));
    }

    #[tokio::test]
    async fn missing_collection_is_malformed() {
        let resp = NodeBuilder::new("iq").attr("type", "result").build();
        assert!(matches!(
            parse_patch_list("regular", &resp, None).await,
            Err(AppStateError::MalformedResponse(_))
        ));
    }
}
