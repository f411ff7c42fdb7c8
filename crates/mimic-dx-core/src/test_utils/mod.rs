mod scripted_client;

pub use scripted_client::ScriptedClient;
