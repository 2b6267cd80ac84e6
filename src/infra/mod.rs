pub mod delijn;
