pub mod getnet;
