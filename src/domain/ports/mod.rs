mod backend_repository;
mod panel_client;
mod selection_strategy;

pub use backend_repository::BackendRepository;
pub use panel_client::PanelClient;
pub use selection_strategy::SelectionStrategy;
