pub mod guard_routes;
