pub mod hawkbit_server;
