use crate::plan::{
    node::{Node, StreamMarker},
    response::{GraphQLResponsePatch, PatchOperation},
};

/// Turns every streamed list field into an `add` patch carrying the item template.
///
/// The first `initial_batch_size` items stay in the initial response. With a batch size of
/// zero the array loses its item template and every item arrives as a patch.
pub(crate) fn process_node(node: &mut Node, patches: &mut Vec<GraphQLResponsePatch>) {
    match node {
        Node::Object(object) => {
            for set in &mut object.field_sets {
                for field in &mut set.fields {
                    if let (Some(stream), Node::Array(array)) = (field.stream.take(), &mut field.value)
                    {
                        let item = if stream.initial_batch_size == 0 {
                            array.item.take()
                        } else {
                            array.item.clone()
                        };
                        if let Some(item) = item {
                            array.stream = Some(StreamMarker {
                                initial_batch_size: stream.initial_batch_size,
                                patch_index: patches.len(),
                            });
                            patches.push(GraphQLResponsePatch {
                                operation: PatchOperation::Add,
                                value: *item,
                                fetch: None,
                            });
                        }
                    }
                    process_node(&mut field.value, patches);
                }
            }
        }
        Node::Array(array) => {
            if let Some(item) = array.item.as_deref_mut() {
                process_node(item, patches);
            }
        }
        _ => {}
    }
}
