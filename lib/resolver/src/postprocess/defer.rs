use crate::plan::{
    node::{DeferMarker, Node, Null, Object},
    response::{GraphQLResponsePatch, PatchOperation},
};

/// Replaces every deferred field with a `null` placeholder and moves its value into a
/// `replace` patch.
///
/// The fetch feeding the field moves along when no synchronous field needs its buffer. It is
/// renumbered to buffer `0`, where patch resolution reads it from.
pub(crate) fn process_node(node: &mut Node, patches: &mut Vec<GraphQLResponsePatch>) {
    match node {
        Node::Object(object) => process_object(object, patches),
        Node::Array(array) => {
            if let Some(item) = array.item.as_deref_mut() {
                process_node(item, patches);
            }
        }
        _ => {}
    }
}

fn process_object(object: &mut Object, patches: &mut Vec<GraphQLResponsePatch>) {
    let synchronous_buffers: Vec<usize> = object
        .field_sets
        .iter()
        .filter(|set| set.fields.iter().any(|field| !field.defer))
        .filter_map(|set| set.buffer_id)
        .collect();

    for set in &mut object.field_sets {
        let moved_buffer = set
            .buffer_id
            .filter(|id| !synchronous_buffers.contains(id));

        let mut deferred_any = false;
        for field in &mut set.fields {
            if !field.defer {
                continue;
            }
            field.defer = false;
            deferred_any = true;

            let placeholder = Node::Null(Null {
                defer: Some(DeferMarker {
                    patch_index: patches.len(),
                }),
            });
            let value = std::mem::replace(&mut field.value, placeholder);
            let fetch = moved_buffer.and_then(|buffer_id| {
                object
                    .fetch
                    .as_ref()
                    .and_then(|fetch| fetch.find(buffer_id))
                    .cloned()
                    .map(|fetch| fetch.with_buffer_id(0))
            });

            patches.push(GraphQLResponsePatch {
                operation: PatchOperation::Replace,
                value,
                fetch,
            });
        }

        if let (true, Some(buffer_id)) = (deferred_any, moved_buffer) {
            set.buffer_id = None;
            object.fetch = object.fetch.take().and_then(|fetch| fetch.without(buffer_id));
        }
    }

    for set in &mut object.field_sets {
        for field in &mut set.fields {
            process_node(&mut field.value, patches);
        }
    }
}
