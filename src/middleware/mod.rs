pub mod rls;

pub use rls::service_principal;
