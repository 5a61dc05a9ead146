use std::fmt;
use std::sync::Arc;

use crate::{
    connector::{BatchFactory, DataSource},
    template::InputTemplate,
};

/// Backend work attached to an object, producing data for one or more buffer ids.
#[derive(Clone, Debug, PartialEq)]
pub enum Fetch {
    Single(SingleFetch),
    /// Independent fetches issued concurrently.
    Parallel(Vec<Fetch>),
    Batch(BatchFetch),
}

/// How a data source response is turned into fetch data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProcessResponseConfig {
    /// The response is a GraphQL response: forward its `errors`, keep only its `data`.
    pub extract_graphql_response: bool,
    /// Keep only `data._entities`. Requires `extract_graphql_response`.
    pub extract_federation_entities: bool,
}

impl ProcessResponseConfig {
    pub fn graphql() -> Self {
        Self {
            extract_graphql_response: true,
            extract_federation_entities: false,
        }
    }

    pub fn entities() -> Self {
        Self {
            extract_graphql_response: true,
            extract_federation_entities: true,
        }
    }
}

#[derive(Clone)]
pub struct SingleFetch {
    pub buffer_id: usize,
    pub input: InputTemplate,
    pub data_source: Arc<dyn DataSource>,
    pub process_response_config: ProcessResponseConfig,
    /// Always fetch per object, even when the data loader is enabled.
    pub disable_data_loader: bool,
    pub set_template_output_to_null_on_variable_null: bool,
    pub disallow_single_flight: bool,
}

impl SingleFetch {
    pub fn new(buffer_id: usize, input: InputTemplate, data_source: Arc<dyn DataSource>) -> Self {
        Self {
            buffer_id,
            input,
            data_source,
            process_response_config: ProcessResponseConfig::default(),
            disable_data_loader: false,
            set_template_output_to_null_on_variable_null: false,
            disallow_single_flight: false,
        }
    }

    pub fn with_process_response_config(mut self, config: ProcessResponseConfig) -> Self {
        self.process_response_config = config;
        self
    }

    pub fn with_null_on_variable_null(mut self) -> Self {
        self.set_template_output_to_null_on_variable_null = true;
        self
    }

    pub fn without_data_loader(mut self) -> Self {
        self.disable_data_loader = true;
        self
    }

    pub fn without_single_flight(mut self) -> Self {
        self.disallow_single_flight = true;
        self
    }

    pub(crate) fn source_id(&self) -> usize {
        Arc::as_ptr(&self.data_source) as *const () as usize
    }
}

impl fmt::Debug for SingleFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFetch")
            .field("buffer_id", &self.buffer_id)
            .field("input", &self.input)
            .field("data_source", &format_args!("{:#x}", self.source_id()))
            .field("process_response_config", &self.process_response_config)
            .field("disable_data_loader", &self.disable_data_loader)
            .field(
                "set_template_output_to_null_on_variable_null",
                &self.set_template_output_to_null_on_variable_null,
            )
            .field("disallow_single_flight", &self.disallow_single_flight)
            .finish()
    }
}

impl PartialEq for SingleFetch {
    fn eq(&self, other: &Self) -> bool {
        self.buffer_id == other.buffer_id
            && self.input == other.input
            && self.source_id() == other.source_id()
            && self.process_response_config == other.process_response_config
            && self.disable_data_loader == other.disable_data_loader
            && self.set_template_output_to_null_on_variable_null
                == other.set_template_output_to_null_on_variable_null
            && self.disallow_single_flight == other.disallow_single_flight
    }
}

/// A single fetch whose per-item inputs are combined into one backend call.
#[derive(Clone)]
pub struct BatchFetch {
    pub fetch: SingleFetch,
    pub batch_factory: Arc<dyn BatchFactory>,
}

impl fmt::Debug for BatchFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchFetch")
            .field("fetch", &self.fetch)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BatchFetch {
    fn eq(&self, other: &Self) -> bool {
        self.fetch == other.fetch
            && Arc::as_ptr(&self.batch_factory) as *const ()
                == Arc::as_ptr(&other.batch_factory) as *const ()
    }
}

impl Fetch {
    /// The single or batch fetch producing `buffer_id`.
    pub fn find(&self, buffer_id: usize) -> Option<&Fetch> {
        match self {
            Fetch::Single(single) if single.buffer_id == buffer_id => Some(self),
            Fetch::Batch(batch) if batch.fetch.buffer_id == buffer_id => Some(self),
            Fetch::Parallel(fetches) => fetches.iter().find_map(|f| f.find(buffer_id)),
            _ => None,
        }
    }

    /// Removes the fetch producing `buffer_id`, returning what is left.
    /// A parallel fetch left with one member collapses into that member.
    pub fn without(self, buffer_id: usize) -> Option<Fetch> {
        match self {
            Fetch::Single(ref single) if single.buffer_id == buffer_id => None,
            Fetch::Batch(ref batch) if batch.fetch.buffer_id == buffer_id => None,
            Fetch::Parallel(fetches) => {
                let mut remaining: Vec<Fetch> = fetches
                    .into_iter()
                    .filter_map(|f| f.without(buffer_id))
                    .collect();
                match remaining.len() {
                    0 => None,
                    1 => remaining.pop(),
                    _ => Some(Fetch::Parallel(remaining)),
                }
            }
            other => Some(other),
        }
    }

    /// Rewrites the buffer id of a single or batch fetch.
    pub fn with_buffer_id(mut self, buffer_id: usize) -> Fetch {
        match &mut self {
            Fetch::Single(single) => single.buffer_id = buffer_id,
            Fetch::Batch(batch) => batch.fetch.buffer_id = buffer_id,
            Fetch::Parallel(_) => {}
        }
        self
    }
}
