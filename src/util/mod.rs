pub mod atomic_map;
