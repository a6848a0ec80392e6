pub mod check_sql;
pub mod evaluate;
pub mod inspect;
