mod helpers;
mod list;
mod recipe;
mod summary;

pub(crate) use list::{
    cmd_list_add, cmd_list_check, cmd_list_clear, cmd_list_clear_completed, cmd_list_delete,
    cmd_list_export, cmd_list_generate, cmd_list_reset_state, cmd_list_show, cmd_list_toggle,
};
pub(crate) use recipe::{
    cmd_recipe_add_ingredient, cmd_recipe_create, cmd_recipe_delete, cmd_recipe_list,
    cmd_recipe_show,
};
pub(crate) use summary::{cmd_list_breakdown, cmd_list_summary};
